use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use vidtube_core::parse_id;
use vidtube_types::api::ContentRequest;
use vidtube_types::models::{Tweet, User};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn create_tweet(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let tweet = state.content.create_tweet(user.id, req.content).await?;
    Ok((StatusCode::CREATED, Json(tweet)))
}

pub async fn user_tweets(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<Vec<Tweet>>> {
    let owner_id = parse_id(&owner_id)?;
    Ok(Json(state.views.build_user_tweets(owner_id).await?))
}

pub async fn delete_tweet(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(tweet_id): Path<String>,
) -> ApiResult<StatusCode> {
    let tweet_id = parse_id(&tweet_id)?;
    state.content.delete_tweet(user.id, tweet_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
