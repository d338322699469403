use axum::{
    Extension, Json,
    extract::{Path, State},
};

use vidtube_core::{parse_id, parse_kind};
use vidtube_types::api::ToggleResponse;
use vidtube_types::models::User;
use vidtube_types::views::LikedTarget;

use crate::auth::AppState;
use crate::error::ApiResult;

/// `kind` is one of `video`, `comment`, `tweet`.
pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((kind, target_id)): Path<(String, String)>,
) -> ApiResult<Json<ToggleResponse>> {
    let kind = parse_kind(&kind)?;
    let target_id = parse_id(&target_id)?;
    let added = state.content.toggle_like(user.id, kind, target_id).await?;
    Ok(Json(ToggleResponse { added }))
}

pub async fn liked_targets(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<LikedTarget>>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.views.build_liked_targets(user.id, kind).await?))
}
