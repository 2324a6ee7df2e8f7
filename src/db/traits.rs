//! Store contracts consumed by the Gmail subsystem.
//!
//! Every failure of the backing store surfaces as `GmailError::StoreUnavailable`; no retries
//! are owned here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GmailError;
use crate::gmail::credential::{CredentialRecord, CredentialScope};
use crate::gmail::watch::{WatchStatus, WatchSubscription};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the user never connected Gmail.
    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, GmailError>;

    /// Insert or overwrite the user's record.
    async fn put(&self, record: CredentialRecord) -> Result<(), GmailError>;

    /// Remove the scopes covered by `scope`; the row goes away once no product scope remains.
    async fn clear(&self, user_id: &str, scope: CredentialScope) -> Result<(), GmailError>;

    /// Store a refreshed access token, but only while `refresh_token` is still the user's
    /// grant. Returns false when a consent replaced the grant during the exchange.
    async fn store_refreshed(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, GmailError>;

    /// Drop both tokens if `refresh_token` is still the user's grant.
    async fn revoke(&self, user_id: &str, refresh_token: &str) -> Result<bool, GmailError>;
}

#[async_trait]
pub trait WatchStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<WatchSubscription>, GmailError>;

    /// Insert or replace the user's subscription, watermark included.
    async fn put(&self, watch: WatchSubscription) -> Result<(), GmailError>;

    async fn delete(&self, user_id: &str) -> Result<(), GmailError>;

    async fn list_active(&self) -> Result<Vec<WatchSubscription>, GmailError>;

    async fn find_by_mailbox(&self, mailbox: &str)
    -> Result<Option<WatchSubscription>, GmailError>;

    /// Move the watermark to `history_id` only if it is strictly newer than the stored one.
    /// Returns whether the watermark moved.
    async fn advance_history_id(&self, user_id: &str, history_id: u64)
    -> Result<bool, GmailError>;

    /// Replace `expires_at` of an existing subscription and mark it active; the watermark is
    /// left untouched. Returns false when no row exists.
    async fn renew(&self, user_id: &str, expires_at: DateTime<Utc>) -> Result<bool, GmailError>;

    async fn set_status(&self, user_id: &str, status: WatchStatus) -> Result<(), GmailError>;
}

use crate::db::DbActorHandle;

#[async_trait]
impl CredentialStore for DbActorHandle {
    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, GmailError> {
        self.get_credential(user_id).await
    }

    async fn put(&self, record: CredentialRecord) -> Result<(), GmailError> {
        self.put_credential(record).await
    }

    async fn clear(&self, user_id: &str, scope: CredentialScope) -> Result<(), GmailError> {
        self.clear_credential(user_id, scope).await
    }

    async fn store_refreshed(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, GmailError> {
        self.store_refreshed_token(user_id, refresh_token, access_token, expires_at)
            .await
    }

    async fn revoke(&self, user_id: &str, refresh_token: &str) -> Result<bool, GmailError> {
        self.revoke_credential(user_id, refresh_token).await
    }
}

#[async_trait]
impl WatchStore for DbActorHandle {
    async fn get(&self, user_id: &str) -> Result<Option<WatchSubscription>, GmailError> {
        self.get_watch(user_id).await
    }

    async fn put(&self, watch: WatchSubscription) -> Result<(), GmailError> {
        self.put_watch(watch).await
    }

    async fn delete(&self, user_id: &str) -> Result<(), GmailError> {
        self.delete_watch(user_id).await
    }

    async fn list_active(&self) -> Result<Vec<WatchSubscription>, GmailError> {
        self.list_active_watches().await
    }

    async fn find_by_mailbox(
        &self,
        mailbox: &str,
    ) -> Result<Option<WatchSubscription>, GmailError> {
        self.find_watch_by_mailbox(mailbox).await
    }

    async fn advance_history_id(
        &self,
        user_id: &str,
        history_id: u64,
    ) -> Result<bool, GmailError> {
        DbActorHandle::advance_history_id(self, user_id, history_id).await
    }

    async fn renew(&self, user_id: &str, expires_at: DateTime<Utc>) -> Result<bool, GmailError> {
        self.renew_watch(user_id, expires_at).await
    }

    async fn set_status(&self, user_id: &str, status: WatchStatus) -> Result<(), GmailError> {
        self.set_watch_status(user_id, status).await
    }
}
