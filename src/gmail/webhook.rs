use crate::db::WatchStore;
use crate::error::GmailError;
use crate::gmail::analysis::AnalysisQueue;
use crate::gmail::watch::WatchStatus;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, error, info};
use vowmail_schema::{GmailPushNotification, PushEnvelope, ScanHint, ScanRequest};

/// What happened to one push delivery. Every variant is acknowledged upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Watermark advanced and a scan request was queued.
    Accepted { user_id: String, history_id: u64 },
    /// `historyId` not newer than the stored watermark.
    Duplicate { user_id: String, history_id: u64 },
    /// No subscription for the mailbox (disconnected user or foreign topic).
    UnknownMailbox { mailbox: String },
    /// Subscription expired after an auth failure; the watermark is left alone.
    Inactive { user_id: String, history_id: u64 },
    /// Watermark advanced but the hand-off failed; logged at error level.
    EnqueueFailed { user_id: String, history_id: u64 },
}

pub struct WebhookIngress {
    watches: Arc<dyn WatchStore>,
    queue: Arc<dyn AnalysisQueue>,
    max_messages: u32,
}

impl WebhookIngress {
    pub fn new(
        watches: Arc<dyn WatchStore>,
        queue: Arc<dyn AnalysisQueue>,
        max_messages: u32,
    ) -> Self {
        Self {
            watches,
            queue,
            max_messages: max_messages.max(1),
        }
    }

    /// Decode `message.data` of a Pub/Sub push envelope.
    pub fn decode(envelope: &PushEnvelope) -> Result<GmailPushNotification, GmailError> {
        let data = envelope.message.data.trim();
        if data.is_empty() {
            return Err(GmailError::malformed("message.data is empty"));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data))
            .map_err(|e| GmailError::malformed(format!("message.data is not base64: {e}")))?;

        let notification: GmailPushNotification = serde_json::from_slice(&bytes)
            .map_err(|e| GmailError::malformed(format!("message.data is not a notification: {e}")))?;
        if notification.email_address.trim().is_empty() {
            return Err(GmailError::malformed("emailAddress is empty"));
        }
        Ok(notification)
    }

    /// Deduplicate by watermark and hand a scan request to the analysis queue.
    ///
    /// Never waits on the analysis pipeline.
    pub async fn handle_notification(
        &self,
        envelope: &PushEnvelope,
    ) -> Result<WebhookOutcome, GmailError> {
        let notification = Self::decode(envelope)?;
        let mailbox = notification.email_address.trim();
        let history_id = notification.history_id;

        let Some(watch) = self.watches.find_by_mailbox(mailbox).await? else {
            info!(mailbox, history_id, "push for unknown mailbox ignored");
            return Ok(WebhookOutcome::UnknownMailbox {
                mailbox: mailbox.to_string(),
            });
        };
        let user_id = watch.user_id;
        if watch.status != WatchStatus::Active {
            info!(
                user_id = %user_id,
                history_id,
                status = watch.status.as_str(),
                "push for inactive gmail watch ignored"
            );
            return Ok(WebhookOutcome::Inactive {
                user_id,
                history_id,
            });
        }

        if !self.watches.advance_history_id(&user_id, history_id).await? {
            debug!(
                user_id = %user_id,
                history_id,
                stored = watch.history_id,
                message_id = envelope.message.message_id.as_deref().unwrap_or("-"),
                "duplicate or stale push ignored"
            );
            return Ok(WebhookOutcome::Duplicate {
                user_id,
                history_id,
            });
        }

        let request = ScanRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            hint: ScanHint {
                message_count: self.max_messages,
            },
        };

        match self.queue.enqueue(request) {
            Ok(()) => {
                debug!(user_id = %user_id, history_id, "scan request queued");
                Ok(WebhookOutcome::Accepted {
                    user_id,
                    history_id,
                })
            }
            Err(e) => {
                error!(
                    user_id = %user_id,
                    history_id,
                    error = %e,
                    "failed to enqueue scan request for gmail push"
                );
                Ok(WebhookOutcome::EnqueueFailed {
                    user_id,
                    history_id,
                })
            }
        }
    }
}
