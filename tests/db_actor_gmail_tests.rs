use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use vowmail::db::{CredentialStore, WatchStore};
use vowmail::gmail::credential::{CredentialRecord, CredentialScope};
use vowmail::gmail::watch::{WatchStatus, WatchSubscription};

const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
const CALENDAR_EVENTS: &str = "https://www.googleapis.com/auth/calendar.events";

fn unique_sqlite_path(prefix: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();

    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "vowmail-{prefix}-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    temp_path
}

async fn cleanup(db_path: &std::path::Path) {
    let wal_path = std::path::PathBuf::from(format!("{}-wal", db_path.to_string_lossy()));
    let shm_path = std::path::PathBuf::from(format!("{}-shm", db_path.to_string_lossy()));
    let _ = fs::remove_file(&wal_path).await;
    let _ = fs::remove_file(&shm_path).await;
    let _ = fs::remove_file(db_path).await;
}

fn credential(user_id: &str, scopes: &[&str]) -> CredentialRecord {
    CredentialRecord {
        user_id: user_id.to_string(),
        access_token: Some("access-1".to_string()),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Utc::now() + Duration::hours(1),
        granted_scopes: scopes.iter().map(|s| (*s).to_string()).collect::<BTreeSet<_>>(),
        mailbox_email: Some("Couple@Example.com".to_string()),
    }
}

fn watch(user_id: &str, history_id: u64) -> WatchSubscription {
    WatchSubscription {
        user_id: user_id.to_string(),
        mailbox_email: "Couple@Example.com".to_string(),
        history_id,
        expires_at: Utc::now() + Duration::days(7),
        topic_name: "projects/p/topics/gmail".to_string(),
        status: WatchStatus::Active,
    }
}

#[tokio::test]
async fn test_gmail_credentials_db_actor_baseline() {
    let db_path = unique_sqlite_path("db-credentials");
    let database_url = format!("sqlite:{}", db_path.display());
    let db = vowmail::db::spawn(&database_url).await;

    // 1. Unknown user has no record.
    assert!(CredentialStore::get(&db, "u1").await.unwrap().is_none());

    // 2. put + get round trips every field.
    let record = credential("u1", &[GMAIL_READONLY, CALENDAR_EVENTS]);
    CredentialStore::put(&db, record.clone()).await.unwrap();
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token, record.access_token);
    assert_eq!(stored.refresh_token, record.refresh_token);
    assert_eq!(stored.granted_scopes, record.granted_scopes);
    assert_eq!(stored.mailbox_email, record.mailbox_email);
    assert_eq!(stored.expires_at.timestamp(), record.expires_at.timestamp());

    // 3. A put without a mailbox keeps the known mailbox.
    let mut refreshed = stored.clone();
    refreshed.mailbox_email = None;
    refreshed.access_token = Some("access-2".to_string());
    CredentialStore::put(&db, refreshed).await.unwrap();
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("access-2"));
    assert_eq!(stored.mailbox_email.as_deref(), Some("Couple@Example.com"));

    // 4. Clearing gmail keeps the calendar grant.
    CredentialStore::clear(&db, "u1", CredentialScope::Gmail)
        .await
        .unwrap();
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert!(!stored.has_gmail_scope());
    assert!(stored.granted_scopes.contains(CALENDAR_EVENTS));

    // 5. Clearing calendar too removes the row.
    CredentialStore::clear(&db, "u1", CredentialScope::Calendar)
        .await
        .unwrap();
    assert!(CredentialStore::get(&db, "u1").await.unwrap().is_none());

    // 6. Clearing a missing user is a no-op.
    CredentialStore::clear(&db, "nobody", CredentialScope::All)
        .await
        .unwrap();

    cleanup(&db_path).await;
}

#[tokio::test]
async fn test_gmail_credentials_token_writes_follow_current_grant() {
    let db_path = unique_sqlite_path("db-credentials-grant");
    let database_url = format!("sqlite:{}", db_path.display());
    let db = vowmail::db::spawn(&database_url).await;

    CredentialStore::put(&db, credential("u1", &[GMAIL_READONLY]))
        .await
        .unwrap();
    let expires_at = Utc::now() + Duration::hours(2);

    // 1. A refresh of the current grant is stored, refresh token untouched.
    assert!(
        db.store_refreshed("u1", "refresh-1", "access-2", expires_at)
            .await
            .unwrap()
    );
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("access-2"));
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(stored.expires_at.timestamp(), expires_at.timestamp());

    // 2. A consent replaces the grant; writes keyed on the old one no longer apply.
    let mut consent = credential("u1", &[GMAIL_READONLY]);
    consent.refresh_token = Some("refresh-2".to_string());
    consent.access_token = Some("consent-access".to_string());
    CredentialStore::put(&db, consent).await.unwrap();

    assert!(
        !db.store_refreshed("u1", "refresh-1", "access-3", expires_at)
            .await
            .unwrap()
    );
    assert!(!CredentialStore::revoke(&db, "u1", "refresh-1").await.unwrap());
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("consent-access"));
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));

    // 3. Revoking the current grant clears both tokens.
    assert!(CredentialStore::revoke(&db, "u1", "refresh-2").await.unwrap());
    let stored = CredentialStore::get(&db, "u1").await.unwrap().unwrap();
    assert!(stored.is_revoked());
    assert!(stored.access_token.is_none());

    // 4. Unknown users never match.
    assert!(!CredentialStore::revoke(&db, "nobody", "refresh-2").await.unwrap());

    cleanup(&db_path).await;
}

#[tokio::test]
async fn test_gmail_watches_db_actor_baseline() {
    let db_path = unique_sqlite_path("db-watches");
    let database_url = format!("sqlite:{}", db_path.display());
    let db = vowmail::db::spawn(&database_url).await;

    assert!(db.list_active().await.unwrap().is_empty());

    WatchStore::put(&db, watch("u1", 100)).await.unwrap();

    // Mailbox lookup ignores case.
    let found = db
        .find_by_mailbox("couple@example.com")
        .await
        .unwrap()
        .expect("watch should be found by mailbox");
    assert_eq!(found.user_id, "u1");
    assert_eq!(found.history_id, 100);

    // Watermark only moves forward.
    assert!(!db.advance_history_id("u1", 100).await.unwrap());
    assert!(!db.advance_history_id("u1", 99).await.unwrap());
    assert!(db.advance_history_id("u1", 101).await.unwrap());
    assert!(!db.advance_history_id("nobody", 500).await.unwrap());

    // Renewal replaces the expiry and keeps the watermark.
    let new_expiry = Utc::now() + Duration::days(14);
    assert!(db.renew("u1", new_expiry).await.unwrap());
    let renewed = WatchStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(renewed.history_id, 101);
    assert_eq!(renewed.expires_at.timestamp(), new_expiry.timestamp());
    assert!(!db.renew("nobody", new_expiry).await.unwrap());

    // Expired watches drop out of the active list.
    db.set_status("u1", WatchStatus::Expired).await.unwrap();
    assert!(db.list_active().await.unwrap().is_empty());
    let expired = WatchStore::get(&db, "u1").await.unwrap().unwrap();
    assert_eq!(expired.status, WatchStatus::Expired);

    WatchStore::delete(&db, "u1").await.unwrap();
    assert!(WatchStore::get(&db, "u1").await.unwrap().is_none());
    assert!(db.find_by_mailbox("couple@example.com").await.unwrap().is_none());

    cleanup(&db_path).await;
}
