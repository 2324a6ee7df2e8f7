use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use url::Url;
use vowmail::config::GmailConfig;
use vowmail::db::{CredentialStore, WatchStore};
use vowmail::error::AuthFailureReason;
use vowmail::gmail::credential::CredentialRecord;
use vowmail::gmail::watch::{RenewOutcome, WatchStatus, WatchSubscription};
use vowmail::gmail::GmailServices;
use vowmail::GmailError;

const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
const CALENDAR_EVENTS: &str = "https://www.googleapis.com/auth/calendar.events";

#[derive(Clone)]
struct WatchMock {
    history_id: Arc<Mutex<u64>>,
    expiration: Arc<Mutex<DateTime<Utc>>>,
    unauthorized: Arc<AtomicBool>,
    watch_bodies: Arc<Mutex<Vec<Value>>>,
    stop_hits: Arc<AtomicUsize>,
}

impl WatchMock {
    fn new(history_id: u64, expiration: DateTime<Utc>) -> Self {
        Self {
            history_id: Arc::new(Mutex::new(history_id)),
            expiration: Arc::new(Mutex::new(expiration)),
            unauthorized: Arc::new(AtomicBool::new(false)),
            watch_bodies: Arc::new(Mutex::new(Vec::new())),
            stop_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn answer_with(&self, history_id: u64, expiration: DateTime<Utc>) {
        *self.history_id.lock().unwrap() = history_id;
        *self.expiration.lock().unwrap() = expiration;
    }
}

async fn watch_handler(State(mock): State<WatchMock>, Json(body): Json<Value>) -> Response {
    mock.watch_bodies.lock().unwrap().push(body);
    if mock.unauthorized.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"code": 401, "message": "Invalid Credentials",
                "errors": [{"reason": "authError"}], "status": "UNAUTHENTICATED"}})),
        )
            .into_response();
    }
    let history_id = *mock.history_id.lock().unwrap();
    let expiration = mock.expiration.lock().unwrap().timestamp_millis();
    Json(json!({
        "historyId": history_id.to_string(),
        "expiration": expiration.to_string()
    }))
    .into_response()
}

async fn stop_handler(State(mock): State<WatchMock>) -> StatusCode {
    mock.stop_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn profile_handler() -> Json<Value> {
    Json(json!({"emailAddress": "couple@example.com", "historyId": "1"}))
}

async fn spawn_test_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let base = Url::parse(&format!("http://{addr}")).expect("valid base url");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    base
}

fn unique_sqlite_url(prefix: &str) -> String {
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
    format!("sqlite:{}", temp_path.display())
}

struct Harness {
    services: GmailServices,
    watches: Arc<dyn WatchStore>,
    mock: WatchMock,
}

async fn harness(prefix: &str, scopes: &[&str], mock: WatchMock) -> Harness {
    let app = Router::new()
        .route("/gmail/v1/users/me/watch", post(watch_handler))
        .route("/gmail/v1/users/me/stop", post(stop_handler))
        .route("/gmail/v1/users/me/profile", get(profile_handler))
        .with_state(mock.clone());
    let base = spawn_test_server(app).await;

    let cfg = Arc::new(GmailConfig {
        api_url: base.clone(),
        oauth_client_id: "client-id".to_string(),
        oauth_token_url: base.join("/token").unwrap(),
        watch_topic_name: "projects/wedding/topics/gmail-push".to_string(),
        retry_max_times: 0,
        ..GmailConfig::default()
    });

    let db = vowmail::db::spawn(&unique_sqlite_url(prefix)).await;
    let credentials: Arc<dyn CredentialStore> = Arc::new(db.clone());
    let watches: Arc<dyn WatchStore> = Arc::new(db);
    credentials
        .put(CredentialRecord {
            user_id: "u1".to_string(),
            access_token: Some("valid-access".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Utc::now() + Duration::minutes(30),
            granted_scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
            mailbox_email: None,
        })
        .await
        .unwrap();

    let services = GmailServices::spawn(cfg, credentials, watches.clone())
        .await
        .expect("services should start");

    Harness {
        services,
        watches,
        mock,
    }
}

#[tokio::test]
async fn enable_stores_watermark_and_expiry_then_sweep_renews_without_losing_it() {
    let now = Utc::now();
    let mock = WatchMock::new(1000, now + Duration::days(7));
    let h = harness("watch-renew", &[GMAIL_READONLY], mock).await;

    let watch = h.services.watch.enable("u1").await.expect("enable");
    assert_eq!(watch.history_id, 1000);
    assert_eq!(watch.mailbox_email, "couple@example.com");
    assert_eq!(watch.status, WatchStatus::Active);
    assert_eq!(
        watch.expires_at.timestamp_millis(),
        (now + Duration::days(7)).timestamp_millis()
    );

    let body = h.mock.watch_bodies.lock().unwrap()[0].clone();
    assert_eq!(body["topicName"], "projects/wedding/topics/gmail-push");
    assert_eq!(body["labelIds"], json!(["INBOX"]));

    // Pushes moved the watermark past the registration's historyId.
    assert!(h.watches.advance_history_id("u1", 1500).await.unwrap());

    // Five days in: still more than 24h left.
    let report = h.services.watch.sweep_at(now + Duration::days(5)).await.unwrap();
    assert_eq!(report.renewed, 0);
    assert_eq!(h.mock.watch_bodies.lock().unwrap().len(), 1);

    // 6d1h in: 23h left, inside the renewal margin.
    h.mock.answer_with(2000, now + Duration::days(13));
    let report = h
        .services
        .watch
        .sweep_at(now + Duration::days(6) + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.renewed, 1);
    assert_eq!(report.failed, 0);

    let stored = h.watches.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.history_id, 1500, "renewal must keep the stored watermark");
    assert_eq!(
        stored.expires_at.timestamp_millis(),
        (now + Duration::days(13)).timestamp_millis()
    );
    assert_eq!(stored.status, WatchStatus::Active);
}

#[tokio::test]
async fn renew_if_needed_reports_not_due_and_not_watching() {
    let now = Utc::now();
    let mock = WatchMock::new(10, now + Duration::days(7));
    let h = harness("watch-not-due", &[GMAIL_READONLY], mock).await;

    assert_eq!(
        h.services.watch.renew_if_needed("u1").await.unwrap(),
        RenewOutcome::NotWatching
    );

    h.services.watch.enable("u1").await.unwrap();
    assert_eq!(
        h.services.watch.renew_if_needed("u1").await.unwrap(),
        RenewOutcome::NotDue
    );
    assert_eq!(h.mock.watch_bodies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unauthorized_renewal_expires_the_watch() {
    let now = Utc::now();
    let mock = WatchMock::new(10, now + Duration::days(7));
    let h = harness("watch-unauthorized", &[GMAIL_READONLY], mock).await;
    h.services.watch.enable("u1").await.unwrap();

    h.mock.unauthorized.store(true, Ordering::SeqCst);
    let report = h
        .services
        .watch
        .sweep_at(now + Duration::days(6) + Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let stored = h.watches.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.status, WatchStatus::Expired);
    assert!(h.watches.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn enable_without_gmail_scope_signals_scope_missing() {
    let mock = WatchMock::new(10, Utc::now() + Duration::days(7));
    let h = harness("watch-scope", &[CALENDAR_EVENTS], mock).await;
    let mut events = h.services.signal.receiver();

    let err = h.services.watch.enable("u1").await.unwrap_err();
    assert_eq!(
        err,
        GmailError::ReauthRequired {
            reason: AuthFailureReason::ScopeMissing
        }
    );
    assert_eq!(events.try_recv().unwrap().reason, AuthFailureReason::ScopeMissing);
    assert!(h.mock.watch_bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disable_stops_upstream_and_removes_the_subscription() {
    let mock = WatchMock::new(10, Utc::now() + Duration::days(7));
    let h = harness("watch-disable", &[GMAIL_READONLY], mock).await;
    h.services.watch.enable("u1").await.unwrap();

    h.services.watch.disable("u1").await.unwrap();
    assert_eq!(h.mock.stop_hits.load(Ordering::SeqCst), 1);
    assert!(h.services.watch.status("u1").await.unwrap().is_none());

    // Disabling again is a no-op.
    h.services.watch.disable("u1").await.unwrap();
    assert_eq!(h.mock.stop_hits.load(Ordering::SeqCst), 1);
}

/// Answers per bearer token: `healthy-access` renews, `revoked-access` is rejected and
/// `stuck-access` never answers within the renewal timeout.
async fn per_user_watch_handler(headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match bearer {
        "Bearer revoked-access" => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"code": 401, "message": "Invalid Credentials",
                "errors": [{"reason": "authError"}], "status": "UNAUTHENTICATED"}})),
        )
            .into_response(),
        "Bearer stuck-access" => {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        _ => Json(json!({
            "historyId": "900",
            "expiration": (Utc::now() + Duration::days(7)).timestamp_millis().to_string()
        }))
        .into_response(),
    }
}

#[tokio::test]
async fn sweep_isolates_failed_and_timed_out_renewals() {
    let app = Router::new().route("/gmail/v1/users/me/watch", post(per_user_watch_handler));
    let base = spawn_test_server(app).await;

    let cfg = Arc::new(GmailConfig {
        api_url: base.clone(),
        oauth_client_id: "client-id".to_string(),
        oauth_token_url: base.join("/token").unwrap(),
        watch_topic_name: "projects/wedding/topics/gmail-push".to_string(),
        retry_max_times: 0,
        watch_renewal_timeout_secs: 1,
        watch_sweep_concurrency: 3,
        ..GmailConfig::default()
    });

    let db = vowmail::db::spawn(&unique_sqlite_url("watch-sweep-isolation")).await;
    let credentials: Arc<dyn CredentialStore> = Arc::new(db.clone());
    let watches: Arc<dyn WatchStore> = Arc::new(db);

    let now = Utc::now();
    for user in ["healthy", "revoked", "stuck"] {
        credentials
            .put(CredentialRecord {
                user_id: user.to_string(),
                access_token: Some(format!("{user}-access")),
                refresh_token: Some(format!("{user}-refresh")),
                expires_at: now + Duration::minutes(30),
                granted_scopes: [GMAIL_READONLY.to_string()].into_iter().collect(),
                mailbox_email: Some(format!("{user}@example.com")),
            })
            .await
            .unwrap();
        watches
            .put(WatchSubscription {
                user_id: user.to_string(),
                mailbox_email: format!("{user}@example.com"),
                history_id: 100,
                expires_at: now + Duration::days(7),
                topic_name: "projects/wedding/topics/gmail-push".to_string(),
                status: WatchStatus::Active,
            })
            .await
            .unwrap();
    }

    let services = GmailServices::spawn(cfg, credentials, watches.clone())
        .await
        .expect("services should start");

    let started = std::time::Instant::now();
    let report = services
        .watch
        .sweep_at(now + Duration::days(6) + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.renewed, 1);
    assert_eq!(report.failed, 2);
    assert!(
        started.elapsed() < std::time::Duration::from_secs(10),
        "a stuck renewal must be cut off by the per-user timeout"
    );

    let healthy = watches.get("healthy").await.unwrap().unwrap();
    assert_eq!(healthy.status, WatchStatus::Active);
    assert_eq!(healthy.history_id, 100);
    assert!(healthy.expires_at > now + Duration::days(6) + Duration::hours(23));

    let revoked = watches.get("revoked").await.unwrap().unwrap();
    assert_eq!(revoked.status, WatchStatus::Expired);

    // A timeout is not an auth failure: the subscription stays up for the next sweep.
    let stuck = watches.get("stuck").await.unwrap().unwrap();
    assert_eq!(stuck.status, WatchStatus::Active);
    assert_eq!(stuck.expires_at.timestamp(), (now + Duration::days(7)).timestamp());
}
