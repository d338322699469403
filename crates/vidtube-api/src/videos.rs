use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use vidtube_core::parse_id;
use vidtube_types::api::PublishVideoRequest;
use vidtube_types::models::{User, Video};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn publish_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<PublishVideoRequest>,
) -> ApiResult<impl IntoResponse> {
    let video = state.content.publish_video(user.id, req).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

pub async fn record_watch(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
) -> ApiResult<StatusCode> {
    let video_id = parse_id(&video_id)?;
    state.content.record_watch(user.id, video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn channel_videos(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<Vec<Video>>> {
    let owner_id = parse_id(&owner_id)?;
    Ok(Json(state.views.build_channel_videos(owner_id).await?))
}
