use axum::{
    Extension, Json,
    extract::{Path, State},
};

use vidtube_types::models::User;
use vidtube_types::views::{ChannelProfile, EnrichedVideo};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn channel_profile(
    State(state): State<AppState>,
    Extension(viewer): Extension<User>,
    Path(username): Path<String>,
) -> ApiResult<Json<ChannelProfile>> {
    let profile = state.views.build_channel_profile(viewer.id, &username).await?;
    Ok(Json(profile))
}

pub async fn watch_history(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<EnrichedVideo>>> {
    Ok(Json(state.views.build_watch_history(user.id).await?))
}
