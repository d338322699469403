use axum::{
    Extension, Json,
    extract::{Path, State},
};

use vidtube_core::parse_id;
use vidtube_types::api::ToggleResponse;
use vidtube_types::models::User;
use vidtube_types::views::UserSummary;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn toggle_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<ToggleResponse>> {
    let channel_id = parse_id(&channel_id)?;
    let added = state.content.toggle_subscription(user.id, channel_id).await?;
    Ok(Json(ToggleResponse { added }))
}

pub async fn channel_subscribers(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let channel_id = parse_id(&channel_id)?;
    Ok(Json(state.views.build_channel_subscribers(channel_id).await?))
}

pub async fn subscribed_channels(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let subscriber_id = parse_id(&subscriber_id)?;
    Ok(Json(state.views.build_subscribed_channels(subscriber_id).await?))
}
