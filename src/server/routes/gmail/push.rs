use crate::VowmailError;
use crate::error::GmailError;
use crate::gmail::webhook::WebhookOutcome;
use crate::server::guards::auth::RequireWebhookToken;
use crate::server::router::VowmailState;
use axum::{body::Bytes, extract::State, http::StatusCode};
use tracing::debug;
use vowmail_schema::PushEnvelope;

/// POST /gmail/push?token=...
///
/// Any well-formed delivery is acknowledged with 204 so Pub/Sub does not redeliver; only store
/// failures answer 503 and get retried.
pub async fn gmail_push(
    _guard: RequireWebhookToken,
    State(state): State<VowmailState>,
    body: Bytes,
) -> Result<StatusCode, VowmailError> {
    let envelope: PushEnvelope = serde_json::from_slice(&body)
        .map_err(|e| GmailError::malformed(format!("invalid push envelope: {e}")))?;

    let outcome = state.services.webhook.handle_notification(&envelope).await?;
    if let WebhookOutcome::Accepted { user_id, history_id } = &outcome {
        debug!(user_id = %user_id, history_id, "gmail push accepted");
    }
    Ok(StatusCode::NO_CONTENT)
}
