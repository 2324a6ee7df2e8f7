use super::api::{GmailApi, GmailOperation};
use crate::config::GmailConfig;
use crate::error::{GmailError, IsRetryable};
use crate::gmail::policy::{ActionForError, classify_upstream_error};
use crate::gmail::quota::{QuotaDecision, QuotaGuard};
use crate::gmail::refresher::TokenRefresherHandle;
use crate::signal::AuthFailureSignal;
use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use vowmail_schema::{GmailErrorBody, GmailProfile, WatchRequest, WatchResponse};

/// How a caller wants quota exhaustion and transient faults handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPolicy {
    /// User-facing request: fail fast with `rate_limited`, at most one retry.
    Interactive,
    /// Background job: sleep for quota (bounded), full retry budget.
    Background,
}

/// Authorized Gmail API calls composed from quota, token refresh and response classification.
#[derive(Clone)]
pub struct GmailClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    api_url: Url,
    quota: Arc<QuotaGuard>,
    refresher: TokenRefresherHandle,
    signal: AuthFailureSignal,
    quota_max_wait: Duration,
    retry_max_times: usize,
}

impl GmailClient {
    pub fn new(
        cfg: &GmailConfig,
        http: reqwest::Client,
        quota: Arc<QuotaGuard>,
        refresher: TokenRefresherHandle,
        signal: AuthFailureSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                api_url: cfg.api_url.clone(),
                quota,
                refresher,
                signal,
                quota_max_wait: cfg.quota_max_wait(),
                retry_max_times: cfg.retry_max_times,
            }),
        }
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.inner.quota
    }

    fn retry_policy(&self, policy: CallPolicy) -> ExponentialBuilder {
        let max_times = match policy {
            CallPolicy::Interactive => self.inner.retry_max_times.min(1),
            CallPolicy::Background => self.inner.retry_max_times,
        };
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(max_times)
            .with_jitter()
    }

    /// Perform `op` for `user_id`. Only `transient` failures are retried; every attempt
    /// takes its own quota slot. The returned JSON is `Null` for empty bodies.
    pub async fn call(
        &self,
        user_id: &str,
        op: &GmailOperation,
        policy: CallPolicy,
    ) -> Result<Value, GmailError> {
        (|| async { self.call_once(user_id, op, policy).await })
            .retry(self.retry_policy(policy))
            .when(|e: &GmailError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    user_id,
                    op = op.name(),
                    "gmail call retrying after error {}, sleeping {:?}",
                    err,
                    dur
                );
            })
            .await
    }

    async fn call_once(
        &self,
        user_id: &str,
        op: &GmailOperation,
        policy: CallPolicy,
    ) -> Result<Value, GmailError> {
        self.acquire_quota(user_id, policy).await?;
        let token = self.inner.refresher.ensure_valid_access_token(user_id).await?;

        let resp = GmailApi::send(&self.inner.http, &self.inner.api_url, &token, op).await?;
        let status = resp.status();

        if status.is_success() {
            debug!(user_id, op = op.name(), %status, "gmail call ok");
            let bytes = resp.bytes().await?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                GmailError::Internal(format!("gmail {} returned invalid JSON: {e}", op.name()))
            });
        }

        let (action, err) = classify_upstream_error::<GmailErrorBody>(resp).await;
        match action {
            ActionForError::Reauth(reason) => {
                // The token was fresh; refreshing again cannot fix this.
                self.inner.signal.publish(user_id, reason);
            }
            ActionForError::RateLimit(hint) => {
                info!(user_id, op = op.name(), retry_after = ?hint, "gmail rate limited user");
            }
            ActionForError::Retry | ActionForError::Reject => {
                warn!(user_id, op = op.name(), %status, action = ?action, "gmail call failed");
            }
        }
        Err(err)
    }

    async fn acquire_quota(&self, user_id: &str, policy: CallPolicy) -> Result<(), GmailError> {
        let deadline = Instant::now() + self.inner.quota_max_wait;
        loop {
            match self.inner.quota.try_acquire(user_id) {
                QuotaDecision::Granted => return Ok(()),
                QuotaDecision::Denied => {
                    return Err(GmailError::RateLimited { retry_after: None });
                }
                QuotaDecision::MustWait(wait) => {
                    let fail = GmailError::RateLimited {
                        retry_after: Some(wait),
                    };
                    if policy == CallPolicy::Interactive || Instant::now() + wait > deadline {
                        return Err(fail);
                    }
                    debug!(user_id, wait = ?wait, "waiting for quota");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        user_id: &str,
        op: &GmailOperation,
        policy: CallPolicy,
    ) -> Result<T, GmailError> {
        let value = self.call(user_id, op, policy).await?;
        serde_json::from_value(value).map_err(|e| {
            GmailError::Internal(format!("unexpected gmail {} response: {e}", op.name()))
        })
    }

    pub async fn watch(
        &self,
        user_id: &str,
        request: WatchRequest,
        policy: CallPolicy,
    ) -> Result<WatchResponse, GmailError> {
        self.call_typed(user_id, &GmailOperation::Watch(request), policy)
            .await
    }

    pub async fn stop(&self, user_id: &str, policy: CallPolicy) -> Result<(), GmailError> {
        self.call(user_id, &GmailOperation::Stop, policy)
            .await
            .map(|_| ())
    }

    pub async fn get_profile(
        &self,
        user_id: &str,
        policy: CallPolicy,
    ) -> Result<GmailProfile, GmailError> {
        self.call_typed(user_id, &GmailOperation::GetProfile, policy)
            .await
    }
}
