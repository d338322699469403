//! HTTP surface for VidTube: axum handlers, the auth middleware and the
//! error-to-status mapping.

pub mod auth;
pub mod channels;
pub mod comments;
pub mod error;
pub mod likes;
pub mod middleware;
pub mod subscriptions;
pub mod tweets;
pub mod videos;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
};
use serde_json::{Value, json};

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, ApiResult};

/// JSON bodies are small; media is uploaded elsewhere.
const BODY_LIMIT: usize = 16 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/users/register", post(auth::register))
        .route("/users/login", post(auth::login))
        .route("/users/refresh-token", post(auth::refresh_token));

    let protected_routes = Router::new()
        .route("/users/logout", post(auth::logout))
        .route("/users/change-password", post(auth::change_password))
        .route("/users/current-user", get(auth::current_user))
        .route("/users/update-account", patch(auth::update_account))
        .route("/users/c/{username}", get(channels::channel_profile))
        .route("/users/history", get(channels::watch_history))
        .route("/videos", post(videos::publish_video))
        .route("/videos/{video_id}/watch", post(videos::record_watch))
        .route("/videos/channel/{owner_id}", get(videos::channel_videos))
        .route(
            "/comments/{video_id}",
            post(comments::add_comment).get(comments::video_comments),
        )
        .route("/tweets", post(tweets::create_tweet))
        .route("/tweets/user/{owner_id}", get(tweets::user_tweets))
        .route("/tweets/{tweet_id}", delete(tweets::delete_tweet))
        .route(
            "/subscriptions/c/{channel_id}",
            post(subscriptions::toggle_subscription).get(subscriptions::channel_subscribers),
        )
        .route("/subscriptions/u/{subscriber_id}", get(subscriptions::subscribed_channels))
        .route("/likes/toggle/{kind}/{target_id}", post(likes::toggle_like))
        .route("/likes/{kind}", get(likes::liked_targets))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
