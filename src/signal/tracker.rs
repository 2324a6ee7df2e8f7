use super::{AuthFailureEvent, AuthFailureSignal};
use ahash::AHashMap;
use futures::StreamExt;
use moka::sync::Cache;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

/// Per-user "needs re-authorization" state derived from [`AuthFailureSignal`].
///
/// A flag is set by any auth failure and cleared only by [`ReauthTracker::mark_consented`].
/// Prompt display is throttled separately so the banner does not flicker.
#[derive(Clone)]
pub struct ReauthTracker {
    flagged: Arc<Mutex<AHashMap<String, AuthFailureEvent>>>,
    prompt_cooldown: Cache<String, ()>,
}

impl ReauthTracker {
    pub fn new(prompt_cooldown: Duration) -> Self {
        let prompt_cooldown = Cache::builder()
            .time_to_live(prompt_cooldown.max(Duration::from_millis(1)))
            .max_capacity(100_000)
            .build();
        Self {
            flagged: Arc::new(Mutex::new(AHashMap::new())),
            prompt_cooldown,
        }
    }

    pub fn record(&self, event: AuthFailureEvent) {
        let mut flagged = self.flagged.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(user_id = %event.user_id, reason = event.reason.as_str(), "reauth flag set");
        flagged.insert(event.user_id.clone(), event);
    }

    pub fn needs_reauth(&self, user_id: &str) -> bool {
        self.flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }

    /// True when the user is flagged and no prompt was shown within the cool-down.
    /// Showing starts a new cool-down.
    pub fn show_prompt(&self, user_id: &str) -> bool {
        if !self.needs_reauth(user_id) {
            return false;
        }
        let entry = self
            .prompt_cooldown
            .entry(user_id.to_string())
            .or_insert(());
        entry.is_fresh()
    }

    /// A fresh consent stored new credentials: clear the flag and any pending cool-down.
    pub fn mark_consented(&self, user_id: &str) {
        let removed = self
            .flagged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id)
            .is_some();
        self.prompt_cooldown.invalidate(user_id);
        if removed {
            info!(user_id, "reauth flag cleared after fresh consent");
        }
    }

    /// Drain `signal` into this tracker until the channel closes.
    pub fn spawn_drain(&self, signal: &AuthFailureSignal) -> JoinHandle<()> {
        let tracker = self.clone();
        let mut stream = signal.subscribe();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => tracker.record(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth failure subscriber lagged, events dropped");
                    }
                }
            }
            debug!("auth failure drain stopped");
        })
    }
}
