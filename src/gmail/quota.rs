use ahash::{AHashMap, AHashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of [`QuotaGuard::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Granted,
    /// Window exhausted; it resets after the given delay.
    MustWait(Duration),
    /// Calls for this user are paused by an operator.
    Denied,
}

/// Rolling counting window of one user.
#[derive(Debug, Clone, Copy)]
pub struct QuotaWindow {
    pub window_start: Instant,
    pub call_count: u32,
}

/// Per-user call budget against the Gmail API.
///
/// Never blocks: callers decide whether to sleep on `MustWait` or fail fast.
#[derive(Debug)]
pub struct QuotaGuard {
    window_limit: u32,
    window_duration: Duration,
    windows: Mutex<AHashMap<String, QuotaWindow>>,
    paused: Mutex<AHashSet<String>>,
}

impl QuotaGuard {
    pub fn new(window_limit: u32, window_duration: Duration) -> Self {
        Self {
            window_limit: window_limit.max(1),
            window_duration,
            windows: Mutex::new(AHashMap::new()),
            paused: Mutex::new(AHashSet::new()),
        }
    }

    pub fn try_acquire(&self, user_id: &str) -> QuotaDecision {
        self.try_acquire_at(user_id, Instant::now())
    }

    pub fn try_acquire_at(&self, user_id: &str, now: Instant) -> QuotaDecision {
        if self
            .paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
        {
            return QuotaDecision::Denied;
        }

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows
            .entry(user_id.to_string())
            .or_insert(QuotaWindow {
                window_start: now,
                call_count: 0,
            });

        let elapsed = now.saturating_duration_since(window.window_start);
        if elapsed >= self.window_duration {
            window.window_start = now;
            window.call_count = 0;
        }

        if window.call_count < self.window_limit {
            window.call_count += 1;
            return QuotaDecision::Granted;
        }

        let retry_after = self.window_duration.saturating_sub(elapsed);
        debug!(
            user_id,
            calls = window.call_count,
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "quota window exhausted"
        );
        QuotaDecision::MustWait(retry_after)
    }

    /// Snapshot of the user's current window, if one exists.
    pub fn window(&self, user_id: &str) -> Option<QuotaWindow> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
    }

    /// Refuse all calls for `user_id` until [`QuotaGuard::resume`].
    pub fn pause(&self, user_id: &str) {
        info!(user_id, "gmail calls paused");
        self.paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string());
    }

    pub fn resume(&self, user_id: &str) {
        let removed = self
            .paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
        if removed {
            info!(user_id, "gmail calls resumed");
        }
    }

    pub fn is_paused(&self, user_id: &str) -> bool {
        self.paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_limit_then_waits_for_reset() {
        let guard = QuotaGuard::new(2, Duration::from_secs(10));

        assert_eq!(guard.try_acquire("u1"), QuotaDecision::Granted);
        assert_eq!(guard.try_acquire("u1"), QuotaDecision::Granted);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            guard.try_acquire("u1"),
            QuotaDecision::MustWait(Duration::from_secs(6))
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(guard.try_acquire("u1"), QuotaDecision::Granted);
        assert_eq!(guard.window("u1").unwrap().call_count, 1);
    }

    #[test]
    fn windows_are_per_user() {
        let guard = QuotaGuard::new(1, Duration::from_secs(60));
        assert_eq!(guard.try_acquire("a"), QuotaDecision::Granted);
        assert_eq!(guard.try_acquire("b"), QuotaDecision::Granted);
        assert!(matches!(guard.try_acquire("a"), QuotaDecision::MustWait(_)));
    }

    #[test]
    fn paused_user_is_denied() {
        let guard = QuotaGuard::new(5, Duration::from_secs(60));
        guard.pause("u1");
        assert_eq!(guard.try_acquire("u1"), QuotaDecision::Denied);
        assert!(guard.window("u1").is_none());

        guard.resume("u1");
        assert_eq!(guard.try_acquire("u1"), QuotaDecision::Granted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_exceed_limit() {
        let guard = Arc::new(QuotaGuard::new(25, Duration::from_secs(3600)));

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.try_acquire("busy") })
            })
            .collect();

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() == QuotaDecision::Granted {
                granted += 1;
            }
        }
        assert_eq!(granted, 25);
        assert_eq!(guard.window("busy").unwrap().call_count, 25);
    }
}
