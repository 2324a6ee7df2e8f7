pub mod oauth;
pub mod push;
pub mod users;

use crate::server::router::VowmailState;
use oauth::{gmail_oauth_callback, gmail_oauth_entry};
use push::gmail_push;
use users::{
    gmail_disconnect, gmail_quota_pause, gmail_quota_resume, gmail_status, gmail_watch_disable,
    gmail_watch_enable,
};

use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// OAuth redirect target; protected by the CSRF cookie instead of the shared key.
pub fn oauth_router() -> Router<VowmailState> {
    Router::new().route("/oauth2callback", get(gmail_oauth_callback))
}

/// Pub/Sub push endpoint, authenticated by the subscription's `?token=`.
pub fn push_router() -> Router<VowmailState> {
    Router::new().route("/gmail/push", post(gmail_push))
}

/// Internal API, mounted behind the shared-key guard.
pub fn api_router() -> Router<VowmailState> {
    Router::new()
        .route("/gmail/auth", get(gmail_oauth_entry))
        .route("/gmail/users/{user_id}", delete(gmail_disconnect))
        .route("/gmail/users/{user_id}/status", get(gmail_status))
        .route(
            "/gmail/users/{user_id}/watch",
            post(gmail_watch_enable).delete(gmail_watch_disable),
        )
        .route(
            "/gmail/users/{user_id}/quota/pause",
            put(gmail_quota_pause).delete(gmail_quota_resume),
        )
}
