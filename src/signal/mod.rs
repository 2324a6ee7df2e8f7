//! Process-wide "this user must re-authenticate" channel.
//!
//! Producers (token refresher, Gmail client, watch manager) publish once per distinct auth
//! failure. The UI-facing [`ReauthTracker`] drains the channel and keeps the per-user flag.

mod tracker;

pub use tracker::ReauthTracker;

use crate::error::AuthFailureReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFailureEvent {
    pub user_id: String,
    pub reason: AuthFailureReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AuthFailureSignal {
    tx: broadcast::Sender<AuthFailureEvent>,
}

impl Default for AuthFailureSignal {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AuthFailureSignal {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an auth failure. Never blocks; with no subscriber the event is dropped.
    pub fn publish(&self, user_id: &str, reason: AuthFailureReason) {
        let event = AuthFailureEvent {
            user_id: user_id.to_string(),
            reason,
            timestamp: Utc::now(),
        };
        warn!(
            user_id,
            reason = reason.as_str(),
            "auth failure published, user must re-authorize"
        );
        let _ = self.tx.send(event);
    }

    /// Stream of events published after this call. Lagging consumers see
    /// `BroadcastStreamRecvError::Lagged` items rather than blocking producers.
    pub fn subscribe(&self) -> BroadcastStream<AuthFailureEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn receiver(&self) -> broadcast::Receiver<AuthFailureEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let signal = AuthFailureSignal::default();
        let mut stream = signal.subscribe();

        signal.publish("u1", AuthFailureReason::RefreshTokenRevoked);

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.reason, AuthFailureReason::RefreshTokenRevoked);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let signal = AuthFailureSignal::new(1);
        signal.publish("u1", AuthFailureReason::ApiUnauthorized);
    }
}
