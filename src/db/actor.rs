use crate::db::models::{DbGmailCredential, DbGmailWatch};
use crate::db::schema::SQLITE_INIT;
use crate::error::GmailError;
use crate::gmail::credential::{CredentialRecord, CredentialScope};
use crate::gmail::watch::{WatchStatus, WatchSubscription};
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info};

type Reply<T> = RpcReplyPort<Result<T, GmailError>>;

#[derive(Debug)]
pub enum DbActorMessage {
    GetCredential(String, Reply<Option<CredentialRecord>>),

    /// Upsert a credential record keyed by user id.
    PutCredential(CredentialRecord, Reply<()>),

    ClearCredential(String, CredentialScope, Reply<()>),

    /// Replace the access token pair if the grant is unchanged; replies whether it applied.
    /// Fields: user id, exchanged refresh token, new access token, new expiry.
    StoreRefreshedToken(String, String, String, DateTime<Utc>, Reply<bool>),

    /// Clear both tokens if the grant is unchanged; replies whether it applied.
    RevokeCredential(String, String, Reply<bool>),

    GetWatch(String, Reply<Option<WatchSubscription>>),

    /// Upsert a watch subscription keyed by user id.
    PutWatch(WatchSubscription, Reply<()>),

    DeleteWatch(String, Reply<()>),

    /// List watches with status=active.
    ListActiveWatches(Reply<Vec<WatchSubscription>>),

    FindWatchByMailbox(String, Reply<Option<WatchSubscription>>),

    /// Conditional watermark bump; replies whether a row moved.
    AdvanceHistoryId(String, u64, Reply<bool>),

    RenewWatch(String, DateTime<Utc>, Reply<bool>),

    SetWatchStatus(String, WatchStatus, Reply<()>),
}

#[derive(Clone)]
pub struct DbActorHandle {
    actor: ActorRef<DbActorMessage>,
}

fn rpc_failed(op: &str, e: impl std::fmt::Display) -> GmailError {
    GmailError::StoreUnavailable {
        message: format!("DbActor {op} RPC failed: {e}"),
    }
}

impl DbActorHandle {
    pub async fn get_credential(
        &self,
        user_id: &str,
    ) -> Result<Option<CredentialRecord>, GmailError> {
        ractor::call!(self.actor, DbActorMessage::GetCredential, user_id.to_string())
            .map_err(|e| rpc_failed("GetCredential", e))?
    }

    pub async fn put_credential(&self, record: CredentialRecord) -> Result<(), GmailError> {
        ractor::call!(self.actor, DbActorMessage::PutCredential, record)
            .map_err(|e| rpc_failed("PutCredential", e))?
    }

    pub async fn clear_credential(
        &self,
        user_id: &str,
        scope: CredentialScope,
    ) -> Result<(), GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::ClearCredential,
            user_id.to_string(),
            scope
        )
        .map_err(|e| rpc_failed("ClearCredential", e))?
    }

    pub async fn store_refreshed_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::StoreRefreshedToken,
            user_id.to_string(),
            refresh_token.to_string(),
            access_token.to_string(),
            expires_at
        )
        .map_err(|e| rpc_failed("StoreRefreshedToken", e))?
    }

    pub async fn revoke_credential(
        &self,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<bool, GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::RevokeCredential,
            user_id.to_string(),
            refresh_token.to_string()
        )
        .map_err(|e| rpc_failed("RevokeCredential", e))?
    }

    pub async fn get_watch(&self, user_id: &str) -> Result<Option<WatchSubscription>, GmailError> {
        ractor::call!(self.actor, DbActorMessage::GetWatch, user_id.to_string())
            .map_err(|e| rpc_failed("GetWatch", e))?
    }

    pub async fn put_watch(&self, watch: WatchSubscription) -> Result<(), GmailError> {
        ractor::call!(self.actor, DbActorMessage::PutWatch, watch)
            .map_err(|e| rpc_failed("PutWatch", e))?
    }

    pub async fn delete_watch(&self, user_id: &str) -> Result<(), GmailError> {
        ractor::call!(self.actor, DbActorMessage::DeleteWatch, user_id.to_string())
            .map_err(|e| rpc_failed("DeleteWatch", e))?
    }

    pub async fn list_active_watches(&self) -> Result<Vec<WatchSubscription>, GmailError> {
        ractor::call!(self.actor, DbActorMessage::ListActiveWatches)
            .map_err(|e| rpc_failed("ListActiveWatches", e))?
    }

    pub async fn find_watch_by_mailbox(
        &self,
        mailbox: &str,
    ) -> Result<Option<WatchSubscription>, GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::FindWatchByMailbox,
            mailbox.to_string()
        )
        .map_err(|e| rpc_failed("FindWatchByMailbox", e))?
    }

    pub async fn advance_history_id(
        &self,
        user_id: &str,
        history_id: u64,
    ) -> Result<bool, GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::AdvanceHistoryId,
            user_id.to_string(),
            history_id
        )
        .map_err(|e| rpc_failed("AdvanceHistoryId", e))?
    }

    pub async fn renew_watch(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::RenewWatch,
            user_id.to_string(),
            expires_at
        )
        .map_err(|e| rpc_failed("RenewWatch", e))?
    }

    pub async fn set_watch_status(
        &self,
        user_id: &str,
        status: WatchStatus,
    ) -> Result<(), GmailError> {
        ractor::call!(
            self.actor,
            DbActorMessage::SetWatchStatus,
            user_id.to_string(),
            status
        )
        .map_err(|e| rpc_failed("SetWatchStatus", e))?
    }
}

struct DbActorState {
    pool: SqlitePool,
}

struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbActorMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let pool = &state.pool;
        match message {
            DbActorMessage::GetCredential(user_id, reply) => {
                let _ = reply.send(get_credential(pool, &user_id).await);
            }
            DbActorMessage::PutCredential(record, reply) => {
                let _ = reply.send(put_credential(pool, &record).await);
            }
            DbActorMessage::ClearCredential(user_id, scope, reply) => {
                let _ = reply.send(clear_credential(pool, &user_id, scope).await);
            }
            DbActorMessage::StoreRefreshedToken(
                user_id,
                refresh_token,
                access_token,
                expires_at,
                reply,
            ) => {
                let res = sqlx::query(
                    r#"
                    UPDATE gmail_credentials
                    SET access_token = ?, expires_at = ?, updated_at = ?
                    WHERE user_id = ? AND refresh_token = ?
                    "#,
                )
                .bind(&access_token)
                .bind(expires_at)
                .bind(Utc::now())
                .bind(&user_id)
                .bind(&refresh_token)
                .execute(pool)
                .await
                .map(|r| r.rows_affected() == 1)
                .map_err(GmailError::from);
                let _ = reply.send(res);
            }
            DbActorMessage::RevokeCredential(user_id, refresh_token, reply) => {
                let res = sqlx::query(
                    r#"
                    UPDATE gmail_credentials
                    SET access_token = NULL, refresh_token = NULL, expires_at = ?, updated_at = ?
                    WHERE user_id = ? AND refresh_token = ?
                    "#,
                )
                .bind(DateTime::<Utc>::UNIX_EPOCH)
                .bind(Utc::now())
                .bind(&user_id)
                .bind(&refresh_token)
                .execute(pool)
                .await
                .map(|r| r.rows_affected() == 1)
                .map_err(GmailError::from);
                let _ = reply.send(res);
            }
            DbActorMessage::GetWatch(user_id, reply) => {
                let res = fetch_watch(pool, "WHERE user_id = ?", &user_id).await;
                let _ = reply.send(res);
            }
            DbActorMessage::PutWatch(watch, reply) => {
                let _ = reply.send(put_watch(pool, &watch).await);
            }
            DbActorMessage::DeleteWatch(user_id, reply) => {
                let res = sqlx::query("DELETE FROM gmail_watches WHERE user_id = ?")
                    .bind(&user_id)
                    .execute(pool)
                    .await
                    .map(|_| ())
                    .map_err(GmailError::from);
                let _ = reply.send(res);
            }
            DbActorMessage::ListActiveWatches(reply) => {
                let _ = reply.send(list_active_watches(pool).await);
            }
            DbActorMessage::FindWatchByMailbox(mailbox, reply) => {
                let res = fetch_watch(
                    pool,
                    "WHERE mailbox_email = ? COLLATE NOCASE ORDER BY updated_at DESC LIMIT 1",
                    &mailbox,
                )
                .await;
                let _ = reply.send(res);
            }
            DbActorMessage::AdvanceHistoryId(user_id, history_id, reply) => {
                let _ = reply.send(advance_history_id(pool, &user_id, history_id).await);
            }
            DbActorMessage::RenewWatch(user_id, expires_at, reply) => {
                let res = sqlx::query(
                    r#"
                    UPDATE gmail_watches
                    SET expires_at = ?, status = 'active', updated_at = ?
                    WHERE user_id = ?
                    "#,
                )
                .bind(expires_at)
                .bind(Utc::now())
                .bind(&user_id)
                .execute(pool)
                .await
                .map(|r| r.rows_affected() == 1)
                .map_err(GmailError::from);
                let _ = reply.send(res);
            }
            DbActorMessage::SetWatchStatus(user_id, status, reply) => {
                let res = sqlx::query(
                    "UPDATE gmail_watches SET status = ?, updated_at = ? WHERE user_id = ?",
                )
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(&user_id)
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(GmailError::from);
                let _ = reply.send(res);
            }
        }
        Ok(())
    }
}

async fn get_credential(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<CredentialRecord>, GmailError> {
    let row = sqlx::query_as::<_, DbGmailCredential>(
        r#"
        SELECT user_id, mailbox_email, access_token, refresh_token, expires_at, granted_scopes, created_at, updated_at
        FROM gmail_credentials
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CredentialRecord::from))
}

async fn put_credential(pool: &SqlitePool, record: &CredentialRecord) -> Result<(), GmailError> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO gmail_credentials (
            user_id, mailbox_email, access_token, refresh_token, expires_at, granted_scopes, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            mailbox_email = COALESCE(excluded.mailbox_email, mailbox_email),
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at,
            granted_scopes = excluded.granted_scopes,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.user_id)
    .bind(record.mailbox_email.as_deref())
    .bind(record.access_token.as_deref())
    .bind(record.refresh_token.as_deref())
    .bind(record.expires_at)
    .bind(record.scopes_joined())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    debug!(user_id = %record.user_id, "credential stored");
    Ok(())
}

async fn clear_credential(
    pool: &SqlitePool,
    user_id: &str,
    scope: CredentialScope,
) -> Result<(), GmailError> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, DbGmailCredential>(
        r#"
        SELECT user_id, mailbox_email, access_token, refresh_token, expires_at, granted_scopes, created_at, updated_at
        FROM gmail_credentials
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(());
    };
    let mut record = CredentialRecord::from(row);

    if record.drop_scope(scope) {
        sqlx::query(
            "UPDATE gmail_credentials SET granted_scopes = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(record.scopes_joined())
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query("DELETE FROM gmail_credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    debug!(user_id, scope = %scope, "credential cleared");
    Ok(())
}

async fn fetch_watch(
    pool: &SqlitePool,
    filter: &str,
    key: &str,
) -> Result<Option<WatchSubscription>, GmailError> {
    let sql = format!(
        "SELECT user_id, mailbox_email, history_id, expires_at, topic_name, status, created_at, updated_at \
         FROM gmail_watches {filter}"
    );
    let row = sqlx::query_as::<_, DbGmailWatch>(&sql)
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(WatchSubscription::from))
}

async fn put_watch(pool: &SqlitePool, watch: &WatchSubscription) -> Result<(), GmailError> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO gmail_watches (
            user_id, mailbox_email, history_id, expires_at, topic_name, status, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            mailbox_email = excluded.mailbox_email,
            history_id = excluded.history_id,
            expires_at = excluded.expires_at,
            topic_name = excluded.topic_name,
            status = excluded.status,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&watch.user_id)
    .bind(&watch.mailbox_email)
    .bind(history_to_db(watch.history_id)?)
    .bind(watch.expires_at)
    .bind(&watch.topic_name)
    .bind(watch.status.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

async fn list_active_watches(pool: &SqlitePool) -> Result<Vec<WatchSubscription>, GmailError> {
    let rows = sqlx::query_as::<_, DbGmailWatch>(
        r#"
        SELECT user_id, mailbox_email, history_id, expires_at, topic_name, status, created_at, updated_at
        FROM gmail_watches
        WHERE status = 'active'
        ORDER BY expires_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(WatchSubscription::from).collect())
}

async fn advance_history_id(
    pool: &SqlitePool,
    user_id: &str,
    history_id: u64,
) -> Result<bool, GmailError> {
    let history_id = history_to_db(history_id)?;
    let res = sqlx::query(
        r#"
        UPDATE gmail_watches
        SET history_id = ?, updated_at = ?
        WHERE user_id = ? AND history_id < ?
        "#,
    )
    .bind(history_id)
    .bind(Utc::now())
    .bind(user_id)
    .bind(history_id)
    .execute(pool)
    .await?;

    Ok(res.rows_affected() == 1)
}

fn history_to_db(history_id: u64) -> Result<i64, GmailError> {
    i64::try_from(history_id)
        .map_err(|_| GmailError::Internal(format!("historyId {history_id} out of range")))
}

/// Spawn the database actor and return a cloneable handle.
pub async fn spawn(database_url: &str) -> DbActorHandle {
    let (actor, _jh) = ractor::Actor::spawn(None, DbActor, database_url.to_string())
        .await
        .expect("failed to spawn DbActor");

    DbActorHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
