//! Single-flight access token refresh.
//!
//! The fast path reads the store and returns a cached token without touching the actor. Callers
//! that need a refresh go through the actor, which keeps one waiter list per user: the first
//! caller starts the exchange, later callers join the list, and everyone receives the same
//! result when the exchange finishes.

use crate::config::GmailConfig;
use crate::db::CredentialStore;
use crate::error::{AuthFailureReason, GmailError};
use crate::gmail::client::oauth::endpoints::GmailOauthEndpoints;
use crate::gmail::credential::access_token_expiry;
use crate::signal::AuthFailureSignal;
use ahash::AHashMap;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use oauth2::TokenResponse;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, warn};

type TokenReply = RpcReplyPort<Result<String, GmailError>>;

#[derive(Debug)]
pub enum RefresherMessage {
    /// Return a valid access token, refreshing (or joining an in-flight refresh) as needed.
    Ensure(String, TokenReply),

    // Internal messages (sent by the refresh task)
    /// Exchange finished; answer every waiter of `user_id`.
    RefreshComplete {
        user_id: String,
        result: Result<String, GmailError>,
    },
}

/// Handle for obtaining access tokens.
#[derive(Clone)]
pub struct TokenRefresherHandle {
    actor: ActorRef<RefresherMessage>,
    store: Arc<dyn CredentialStore>,
    margin: chrono::Duration,
}

impl TokenRefresherHandle {
    /// A token valid for at least the configured safety margin.
    ///
    /// Fails with `reauth_required` without any network call once the grant is known revoked.
    pub async fn ensure_valid_access_token(&self, user_id: &str) -> Result<String, GmailError> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or(GmailError::NotConnected)?;

        if record.is_revoked() {
            return Err(GmailError::ReauthRequired {
                reason: AuthFailureReason::RefreshTokenRevoked,
            });
        }
        if let Some(token) = record.usable_access_token(Utc::now(), self.margin) {
            return Ok(token.to_string());
        }

        ractor::call!(self.actor, RefresherMessage::Ensure, user_id.to_string())
            .map_err(|e| GmailError::Internal(format!("TokenRefresher Ensure RPC failed: {e}")))?
    }
}

struct RefreshContext {
    cfg: Arc<GmailConfig>,
    store: Arc<dyn CredentialStore>,
    signal: AuthFailureSignal,
    http: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
}

impl RefreshContext {
    async fn refresh(&self, user_id: &str) -> Result<String, GmailError> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or(GmailError::NotConnected)?;

        // A refresh that completed between the caller's read and this task needs no exchange.
        if let Some(token) = record.usable_access_token(Utc::now(), self.cfg.token_refresh_margin())
        {
            return Ok(token.to_string());
        }
        let Some(refresh_token) = record.refresh_token.filter(|t| !t.is_empty()) else {
            return Err(GmailError::ReauthRequired {
                reason: AuthFailureReason::RefreshTokenRevoked,
            });
        };

        self.limiter.until_ready().await;
        info!(user_id, "token refresh started");

        match GmailOauthEndpoints::refresh_access_token_with_retry(
            &self.cfg,
            &refresh_token,
            self.http.clone(),
        )
        .await
        {
            Ok(token) => {
                let access_token = token.access_token().secret().to_string();
                let expires_at = access_token_expiry(token.expires_in());
                let stored = self
                    .store
                    .store_refreshed(user_id, &refresh_token, &access_token, expires_at)
                    .await?;
                if stored {
                    info!(user_id, "token refresh finished");
                } else {
                    info!(user_id, "grant replaced by consent during refresh, token not stored");
                }
                Ok(access_token)
            }
            Err(e) => {
                let err = GmailError::from(e);
                let GmailError::ReauthRequired { reason } = err else {
                    warn!(user_id, error = %err, "token refresh failed");
                    return Err(err);
                };

                match self.store.revoke(user_id, &refresh_token).await {
                    Ok(false) => {
                        info!(user_id, "rejected grant was already replaced by a new consent");
                        return self.token_after_consent(user_id).await;
                    }
                    Ok(true) => warn!(user_id, "refresh token rejected with invalid_grant"),
                    Err(store_err) => warn!(
                        user_id,
                        error = %store_err,
                        "refresh token rejected with invalid_grant, failed to persist revocation"
                    ),
                }
                self.signal.publish(user_id, reason);
                Err(err)
            }
        }
    }

    /// Serve the grant a consent stored while the old one was being exchanged.
    async fn token_after_consent(&self, user_id: &str) -> Result<String, GmailError> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or(GmailError::NotConnected)?;
        match record.usable_access_token(Utc::now(), self.cfg.token_refresh_margin()) {
            Some(token) => Ok(token.to_string()),
            None => Err(GmailError::transient(
                "credential replaced during refresh, retry with the new grant",
            )),
        }
    }
}

struct RefresherState {
    waiters: AHashMap<String, Vec<TokenReply>>,
    ctx: Arc<RefreshContext>,
}

struct TokenRefresher;

#[ractor::async_trait]
impl Actor for TokenRefresher {
    type Msg = RefresherMessage;
    type State = RefresherState;
    type Arguments = Arc<RefreshContext>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        ctx: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(oauth_tps = ctx.cfg.oauth_tps, "TokenRefresher started");
        Ok(RefresherState {
            waiters: AHashMap::new(),
            ctx,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RefresherMessage::Ensure(user_id, reply) => {
                if let Some(waiters) = state.waiters.get_mut(&user_id) {
                    debug!(user_id = %user_id, waiters = waiters.len(), "refresh coalesced");
                    waiters.push(reply);
                    return Ok(());
                }

                state.waiters.insert(user_id.clone(), vec![reply]);
                let ctx = state.ctx.clone();
                tokio::spawn(async move {
                    let result = ctx.refresh(&user_id).await;
                    let _ = ractor::cast!(
                        myself,
                        RefresherMessage::RefreshComplete { user_id, result }
                    );
                });
            }
            RefresherMessage::RefreshComplete { user_id, result } => {
                let waiters = state.waiters.remove(&user_id).unwrap_or_default();
                debug!(
                    user_id = %user_id,
                    waiters = waiters.len(),
                    ok = result.is_ok(),
                    "refresh delivered"
                );
                for reply in waiters {
                    let _ = reply.send(result.clone());
                }
            }
        }
        Ok(())
    }
}

/// Spawn the refresher actor.
pub async fn spawn(
    cfg: Arc<GmailConfig>,
    store: Arc<dyn CredentialStore>,
    signal: AuthFailureSignal,
    http: reqwest::Client,
) -> TokenRefresherHandle {
    let oauth_tps = u32::try_from(cfg.oauth_tps.max(1)).unwrap_or(u32::MAX);
    let burst = oauth_tps.saturating_mul(2);
    let limiter = RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(oauth_tps).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN)),
    );

    let margin = cfg.token_refresh_margin();
    let ctx = Arc::new(RefreshContext {
        cfg,
        store: store.clone(),
        signal,
        http,
        limiter,
    });

    let (actor, _jh) = Actor::spawn(None, TokenRefresher, ctx)
        .await
        .expect("failed to spawn TokenRefresher");

    TokenRefresherHandle {
        actor,
        store,
        margin,
    }
}
