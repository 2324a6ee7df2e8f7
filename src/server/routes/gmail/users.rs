use crate::VowmailError;
use crate::error::AuthFailureReason;
use crate::gmail::credential::CredentialScope;
use crate::server::router::VowmailState;
use crate::signal::AuthFailureEvent;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct DisconnectQuery {
    #[serde(default)]
    pub scope: CredentialScope,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailStatus {
    pub needs_reauth: bool,
    pub watch_active: bool,
    pub show_prompt: bool,
    pub quota_paused: bool,
}

/// GET /gmail/users/{user_id}/status
pub async fn gmail_status(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
) -> Result<Json<GmailStatus>, VowmailError> {
    let services = &state.services;
    let credential = services.credentials.get(&user_id).await?;

    // A revoked grant persisted across restarts is not in the in-memory tracker yet.
    if credential.as_ref().is_some_and(|c| c.is_revoked())
        && !services.tracker.needs_reauth(&user_id)
    {
        services.tracker.record(AuthFailureEvent {
            user_id: user_id.clone(),
            reason: AuthFailureReason::RefreshTokenRevoked,
            timestamp: Utc::now(),
        });
    }

    let needs_reauth = services.tracker.needs_reauth(&user_id);
    let watch_active = services
        .watch
        .status(&user_id)
        .await?
        .is_some_and(|w| w.is_active(Utc::now()));

    Ok(Json(GmailStatus {
        needs_reauth,
        watch_active,
        show_prompt: needs_reauth && services.tracker.show_prompt(&user_id),
        quota_paused: services.quota.is_paused(&user_id),
    }))
}

/// POST /gmail/users/{user_id}/watch
pub async fn gmail_watch_enable(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, VowmailError> {
    let watch = state.services.watch.enable(&user_id).await?;
    Ok(Json(json!({
        "userId": watch.user_id,
        "mailboxEmail": watch.mailbox_email,
        "historyId": watch.history_id.to_string(),
        "expiresAt": watch.expires_at,
        "status": watch.status.as_str(),
    })))
}

/// DELETE /gmail/users/{user_id}/watch
pub async fn gmail_watch_disable(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, VowmailError> {
    state.services.watch.disable(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /gmail/users/{user_id}?scope=gmail|calendar|all
///
/// The watch is stopped before the tokens go away, while `users.stop` can still authorize.
pub async fn gmail_disconnect(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
    Query(query): Query<DisconnectQuery>,
) -> Result<StatusCode, VowmailError> {
    let services = &state.services;
    let Some(mut remaining) = services.credentials.get(&user_id).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };

    remaining.drop_scope(query.scope);
    if !remaining.has_gmail_scope() {
        services.watch.disable(&user_id).await?;
    }
    services.credentials.clear(&user_id, query.scope).await?;

    info!(user_id = %user_id, scope = %query.scope, "gmail credentials cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /gmail/users/{user_id}/quota/pause
pub async fn gmail_quota_pause(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.services.quota.pause(&user_id);
    StatusCode::NO_CONTENT
}

/// DELETE /gmail/users/{user_id}/quota/pause
pub async fn gmail_quota_resume(
    State(state): State<VowmailState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.services.quota.resume(&user_id);
    StatusCode::NO_CONTENT
}
