use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};

use vidtube_core::{CoreError, parse_id};
use vidtube_types::api::{ContentRequest, PageQuery};
use vidtube_types::models::User;
use vidtube_types::views::CommentPage;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn add_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
    Json(req): Json<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let video_id = parse_id(&video_id)?;
    let comment = state.content.add_comment(user.id, video_id, req.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `?page=1&limit=10` by default.
pub async fn video_comments(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<CommentPage>> {
    let Query(query) = query.map_err(|e| CoreError::Validation(e.body_text()))?;
    let video_id = parse_id(&video_id)?;
    Ok(Json(
        state
            .views
            .build_video_comments(video_id, query.page, query.limit)
            .await?,
    ))
}
