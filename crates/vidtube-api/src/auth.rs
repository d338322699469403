use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use tracing::info;

use vidtube_core::CoreError;
use vidtube_core::accounts::Accounts;
use vidtube_core::content::Content;
use vidtube_core::session::{SessionConfig, SessionManager, TokenPair};
use vidtube_core::views::ViewBuilder;
use vidtube_db::Database;
use vidtube_types::api::{
    ChangePasswordRequest, LoginRequest, LoginResponse, PublicUser, RefreshRequest,
    RegisterRequest, TokenResponse, UpdateAccountRequest,
};
use vidtube_types::models::User;

use crate::error::ApiResult;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub sessions: SessionManager,
    pub views: ViewBuilder,
    pub accounts: Accounts,
    pub content: Content,
    /// Off only for plain-HTTP local development.
    pub cookie_secure: bool,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, session: SessionConfig, cookie_secure: bool) -> AppState {
        Arc::new(Self {
            sessions: SessionManager::new(db.clone(), session),
            views: ViewBuilder::new(db.clone()),
            accounts: Accounts::new(db.clone()),
            content: Content::new(db),
            cookie_secure,
        })
    }
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

fn with_session_cookies(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.register(req).await?;
    Ok((StatusCode::CREATED, Json(PublicUser::from(&user))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.authenticate(req).await?;
    let pair = state.sessions.issue(user.id).await?;
    info!(user_id = %user.id, "User logged in");

    let jar = with_session_cookies(jar, &pair, state.cookie_secure);
    Ok((
        jar,
        Json(LoginResponse {
            user: PublicUser::from(&user),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    jar: CookieJar,
) -> ApiResult<impl IntoResponse> {
    state.sessions.revoke(user.id).await?;
    info!(user_id = %user.id, "User logged out");

    let jar = jar
        .remove(Cookie::build((ACCESS_COOKIE, "")).path("/"))
        .remove(Cookie::build((REFRESH_COOKIE, "")).path("/"));
    Ok((jar, Json(json!({ "message": "logged out" }))))
}

/// Accepts the refresh token from the `refreshToken` cookie or from a JSON
/// body `{"refreshToken": ...}`; the cookie wins when both are present.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let from_body = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| CoreError::Validation(format!("malformed body: {}", e)))?
    };

    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or(from_body.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or(CoreError::TokenInvalid)?;

    let pair = state.sessions.rotate(&presented).await?;
    let jar = with_session_cookies(jar, &pair, state.cookie_secure);
    Ok((
        jar,
        Json(TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }),
    ))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .accounts
        .change_password(user.id, req.old_password, req.new_password)
        .await?;
    Ok(Json(json!({ "message": "password changed" })))
}

pub async fn current_user(Extension(user): Extension<User>) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<UpdateAccountRequest>,
) -> ApiResult<Json<PublicUser>> {
    let updated = state
        .accounts
        .update_account(user.id, req.full_name, req.email)
        .await?;
    Ok(Json(PublicUser::from(&updated)))
}
