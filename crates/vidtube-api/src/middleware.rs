use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use vidtube_core::CoreError;

use crate::auth::{ACCESS_COOKIE, AppState};
use crate::error::ApiError;

/// Pulls the access token from the `accessToken` cookie, falling back to an
/// `Authorization: Bearer` header.
fn access_token(jar: &CookieJar, req: &Request) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        return Some(cookie.value().to_string());
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Verifies the access token and injects the caller's [`User`] document.
///
/// [`User`]: vidtube_types::models::User
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = access_token(&jar, &req)
        .filter(|t| !t.is_empty())
        .ok_or(CoreError::TokenInvalid)?;

    let user_id = state.sessions.verify_access(&token)?;

    // A valid token for a deleted account is treated like a forged one.
    let user = state.accounts.get(user_id).await.map_err(|e| match e {
        CoreError::NotFound(_) => CoreError::TokenInvalid,
        other => other,
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
