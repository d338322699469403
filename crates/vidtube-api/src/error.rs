use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use vidtube_core::CoreError;

/// Handler error. Every credential failure renders the same 401 body so
/// callers cannot tell an expired token from a forged or revoked one.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            e if e.is_auth_failure() => {
                warn!(reason = %e, "Rejected credentials");
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            e => {
                error!(error = ?e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
