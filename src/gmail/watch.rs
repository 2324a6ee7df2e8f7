//! Gmail push subscription lifecycle.
//!
//! Per user: `Disabled -> Active -> (renewing) -> Active`, or `Active -> Expired -> Disabled`.
//! No row means disabled.

use crate::config::GmailConfig;
use crate::db::models::DbGmailWatch;
use crate::db::{CredentialStore, WatchStore};
use crate::error::{AuthFailureReason, GmailError};
use crate::gmail::client::{CallPolicy, GmailClient};
use crate::signal::AuthFailureSignal;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vowmail_schema::WatchRequest;

/// Gmail caps a watch at seven days.
const MAX_WATCH_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Active,
    Expired,
}

impl WatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchStatus::Active => "active",
            WatchStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSubscription {
    pub user_id: String,
    pub mailbox_email: String,
    pub history_id: u64,
    pub expires_at: DateTime<Utc>,
    pub topic_name: String,
    pub status: WatchStatus,
}

impl WatchSubscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == WatchStatus::Active && self.expires_at > now
    }
}

impl From<DbGmailWatch> for WatchSubscription {
    fn from(d: DbGmailWatch) -> Self {
        WatchSubscription {
            user_id: d.user_id,
            mailbox_email: d.mailbox_email,
            history_id: u64::try_from(d.history_id).unwrap_or_default(),
            expires_at: d.expires_at,
            topic_name: d.topic_name,
            status: if d.status == "active" {
                WatchStatus::Active
            } else {
                WatchStatus::Expired
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewOutcome {
    Renewed { expires_at: DateTime<Utc> },
    NotDue,
    NotWatching,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub renewed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct WatchManager {
    cfg: Arc<GmailConfig>,
    client: GmailClient,
    watches: Arc<dyn WatchStore>,
    credentials: Arc<dyn CredentialStore>,
    signal: AuthFailureSignal,
}

impl WatchManager {
    pub fn new(
        cfg: Arc<GmailConfig>,
        client: GmailClient,
        watches: Arc<dyn WatchStore>,
        credentials: Arc<dyn CredentialStore>,
        signal: AuthFailureSignal,
    ) -> Self {
        Self {
            cfg,
            client,
            watches,
            credentials,
            signal,
        }
    }

    fn watch_request(&self) -> WatchRequest {
        WatchRequest::inbox_only(
            self.cfg.watch_topic_name.clone(),
            self.cfg.watch_label_ids.clone(),
        )
    }

    fn expiry_from(resp_expires: Option<DateTime<Utc>>) -> DateTime<Utc> {
        resp_expires.unwrap_or_else(|| Utc::now() + Duration::days(MAX_WATCH_LIFETIME_DAYS))
    }

    /// Register a subscription and store its watermark and expiry, replacing any prior one.
    pub async fn enable(&self, user_id: &str) -> Result<WatchSubscription, GmailError> {
        let credential = self
            .credentials
            .get(user_id)
            .await?
            .ok_or(GmailError::NotConnected)?;
        if !credential.has_gmail_scope() {
            let reason = AuthFailureReason::ScopeMissing;
            self.signal.publish(user_id, reason);
            return Err(GmailError::ReauthRequired { reason });
        }

        let mailbox_email = match credential.mailbox_email.filter(|m| !m.is_empty()) {
            Some(email) => email,
            None => {
                self.client
                    .get_profile(user_id, CallPolicy::Background)
                    .await?
                    .email_address
            }
        };

        let resp = match self
            .client
            .watch(user_id, self.watch_request(), CallPolicy::Background)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_auth() {
                    self.mark_expired(user_id).await;
                }
                return Err(e);
            }
        };

        let watch = WatchSubscription {
            user_id: user_id.to_string(),
            mailbox_email,
            history_id: resp.history_id,
            expires_at: Self::expiry_from(resp.expires_at()),
            topic_name: self.cfg.watch_topic_name.clone(),
            status: WatchStatus::Active,
        };
        self.watches.put(watch.clone()).await?;

        info!(
            user_id,
            history_id = watch.history_id,
            expires_at = %watch.expires_at,
            "gmail watch enabled"
        );
        Ok(watch)
    }

    pub async fn renew_if_needed(&self, user_id: &str) -> Result<RenewOutcome, GmailError> {
        self.renew_if_needed_at(user_id, Utc::now()).await
    }

    /// Re-register when the stored subscription expires within the renewal margin of `now`.
    ///
    /// The stored watermark is kept: notifications between the old and new registration are
    /// still newer than it and get processed.
    pub async fn renew_if_needed_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RenewOutcome, GmailError> {
        let Some(watch) = self.watches.get(user_id).await? else {
            return Ok(RenewOutcome::NotWatching);
        };
        if watch.status != WatchStatus::Active {
            return Ok(RenewOutcome::NotWatching);
        }
        if watch.expires_at - self.cfg.watch_renewal_margin() > now {
            return Ok(RenewOutcome::NotDue);
        }

        let resp = match self
            .client
            .watch(user_id, self.watch_request(), CallPolicy::Background)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_auth() {
                    self.mark_expired(user_id).await;
                }
                return Err(e);
            }
        };

        let expires_at = Self::expiry_from(resp.expires_at());
        if !self.watches.renew(user_id, expires_at).await? {
            // Disabled while the call was in flight.
            return Ok(RenewOutcome::NotWatching);
        }

        info!(
            user_id,
            history_id = watch.history_id,
            upstream_history_id = resp.history_id,
            expires_at = %expires_at,
            "gmail watch renewed"
        );
        Ok(RenewOutcome::Renewed { expires_at })
    }

    /// Drop the stored subscription; telling Gmail to stop is best-effort.
    pub async fn disable(&self, user_id: &str) -> Result<(), GmailError> {
        if self.watches.get(user_id).await?.is_none() {
            return Ok(());
        }
        if let Err(e) = self.client.stop(user_id, CallPolicy::Interactive).await {
            warn!(
                user_id,
                error = %e,
                "gmail watch stop failed, deleting local subscription anyway"
            );
        }
        self.watches.delete(user_id).await?;
        info!(user_id, "gmail watch disabled");
        Ok(())
    }

    /// Current subscription, if any.
    pub async fn status(&self, user_id: &str) -> Result<Option<WatchSubscription>, GmailError> {
        self.watches.get(user_id).await
    }

    async fn mark_expired(&self, user_id: &str) {
        // The auth failure itself was already published by the component that observed it.
        match self.watches.set_status(user_id, WatchStatus::Expired).await {
            Ok(()) => info!(user_id, "gmail watch expired after auth failure"),
            Err(e) => warn!(user_id, error = %e, "failed to mark gmail watch expired"),
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, GmailError> {
        self.sweep_at(Utc::now()).await
    }

    /// Renew every active subscription due at `now`. Each renewal runs under its own timeout;
    /// one user's failure does not affect the others.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, GmailError> {
        let margin = self.cfg.watch_renewal_margin();
        let due: Vec<WatchSubscription> = self
            .watches
            .list_active()
            .await?
            .into_iter()
            .filter(|w| w.expires_at - margin <= now)
            .collect();

        let timeout = self.cfg.watch_renewal_timeout();
        let concurrency = self.cfg.watch_sweep_concurrency.max(1);

        let results: Vec<(String, Result<Result<RenewOutcome, GmailError>, _>)> =
            futures::stream::iter(due)
                .map(|watch| async move {
                    let res =
                        tokio::time::timeout(timeout, self.renew_if_needed_at(&watch.user_id, now))
                            .await;
                    (watch.user_id, res)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut report = SweepReport::default();
        for (user_id, res) in results {
            match res {
                Ok(Ok(RenewOutcome::Renewed { .. })) => report.renewed += 1,
                Ok(Ok(_)) => report.skipped += 1,
                Ok(Err(e)) => {
                    warn!(
                        user_id = %user_id,
                        error = %e,
                        kind = e.kind(),
                        "gmail watch renewal failed"
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(user_id = %user_id, timeout = ?timeout, "gmail watch renewal timed out");
                    report.failed += 1;
                }
            }
        }

        debug!(
            renewed = report.renewed,
            skipped = report.skipped,
            failed = report.failed,
            "gmail watch sweep finished"
        );
        Ok(report)
    }

    /// Run [`WatchManager::sweep`] every `watch_sweep_interval`. Abort the handle on shutdown.
    pub fn spawn_sweep(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.cfg.watch_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?period, "gmail watch sweep started");
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) if report.renewed + report.failed > 0 => info!(
                        renewed = report.renewed,
                        failed = report.failed,
                        "gmail watch sweep"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "gmail watch sweep could not list subscriptions"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, history_id: i64) -> DbGmailWatch {
        let now = Utc::now();
        DbGmailWatch {
            user_id: "u1".to_string(),
            mailbox_email: "couple@example.com".to_string(),
            history_id,
            expires_at: now + Duration::days(7),
            topic_name: "projects/p/topics/t".to_string(),
            status: status.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_status_maps_to_enum() {
        let active = WatchSubscription::from(row("active", 12));
        assert_eq!(active.status, WatchStatus::Active);
        assert_eq!(active.history_id, 12);
        assert!(active.is_active(Utc::now()));

        let expired = WatchSubscription::from(row("expired", 12));
        assert!(!expired.is_active(Utc::now()));
    }

    #[test]
    fn missing_expiration_defaults_to_gmail_cap() {
        let expiry = WatchManager::expiry_from(None);
        assert!(expiry > Utc::now() + Duration::days(6));
        assert!(expiry <= Utc::now() + Duration::days(7));
    }
}
