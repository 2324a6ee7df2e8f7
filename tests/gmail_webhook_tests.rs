use base64::Engine as _;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use vowmail::db::WatchStore;
use vowmail::gmail::analysis::{AnalysisQueue, ChannelAnalysisQueue, EnqueueError};
use vowmail::gmail::watch::{WatchStatus, WatchSubscription};
use vowmail::gmail::{WebhookIngress, WebhookOutcome};
use vowmail_schema::{PushEnvelope, ScanRequest};

#[derive(Default)]
struct RecordingQueue {
    requests: Mutex<Vec<ScanRequest>>,
}

impl AnalysisQueue for RecordingQueue {
    fn enqueue(&self, request: ScanRequest) -> Result<(), EnqueueError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
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

fn push(email: &str, history_id: u64) -> PushEnvelope {
    let data = base64::engine::general_purpose::STANDARD
        .encode(json!({"emailAddress": email, "historyId": history_id}).to_string());
    serde_json::from_value(json!({
        "message": {"data": data, "messageId": format!("msg-{history_id}")},
        "subscription": "projects/p/subscriptions/gmail-push"
    }))
    .unwrap()
}

async fn watches_with_subscription(prefix: &str, history_id: u64) -> Arc<dyn WatchStore> {
    let db = vowmail::db::spawn(&unique_sqlite_url(prefix)).await;
    let watches: Arc<dyn WatchStore> = Arc::new(db);
    watches
        .put(WatchSubscription {
            user_id: "u1".to_string(),
            mailbox_email: "couple@example.com".to_string(),
            history_id,
            expires_at: Utc::now() + Duration::days(7),
            topic_name: "projects/p/topics/gmail".to_string(),
            status: WatchStatus::Active,
        })
        .await
        .unwrap();
    watches
}

#[tokio::test]
async fn out_of_order_and_duplicate_pushes_trigger_once_per_newer_watermark() {
    let watches = watches_with_subscription("webhook-order", 1).await;
    let queue = Arc::new(RecordingQueue::default());
    let ingress = WebhookIngress::new(watches.clone(), queue.clone(), 20);

    let mut outcomes = Vec::new();
    for history_id in [5, 3, 7, 7, 5] {
        outcomes.push(
            ingress
                .handle_notification(&push("couple@example.com", history_id))
                .await
                .unwrap(),
        );
    }

    let accepted: Vec<u64> = outcomes
        .iter()
        .filter_map(|o| match o {
            WebhookOutcome::Accepted { history_id, .. } => Some(*history_id),
            _ => None,
        })
        .collect();
    assert_eq!(accepted, vec![5, 7]);
    assert!(matches!(
        outcomes[1],
        WebhookOutcome::Duplicate { history_id: 3, .. }
    ));

    let requests = queue.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.user_id == "u1"));
    assert!(requests.iter().all(|r| r.hint.message_count == 20));
    assert_ne!(requests[0].request_id, requests[1].request_id);

    let stored = watches.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.history_id, 7);
}

#[tokio::test]
async fn concurrent_deliveries_of_the_same_push_enqueue_once() {
    let watches = watches_with_subscription("webhook-concurrent", 10).await;
    let queue = Arc::new(RecordingQueue::default());
    let ingress = Arc::new(WebhookIngress::new(watches, queue.clone(), 20));

    let deliveries: Vec<_> = (0..8)
        .map(|_| {
            let ingress = ingress.clone();
            tokio::spawn(async move {
                ingress
                    .handle_notification(&push("Couple@Example.com", 11))
                    .await
            })
        })
        .collect();
    for delivery in deliveries {
        delivery.await.unwrap().unwrap();
    }

    assert_eq!(queue.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_mailbox_is_acknowledged_without_trigger() {
    let watches = watches_with_subscription("webhook-unknown", 1).await;
    let queue = Arc::new(RecordingQueue::default());
    let ingress = WebhookIngress::new(watches, queue.clone(), 20);

    let outcome = ingress
        .handle_notification(&push("stranger@example.com", 99))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::UnknownMailbox {
            mailbox: "stranger@example.com".to_string()
        }
    );
    assert!(queue.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn full_queue_is_reported_and_watermark_still_advances() {
    let watches = watches_with_subscription("webhook-full", 1).await;
    let (queue, _rx) = ChannelAnalysisQueue::new(1);
    let ingress = WebhookIngress::new(watches.clone(), Arc::new(queue), 20);

    let first = ingress
        .handle_notification(&push("couple@example.com", 2))
        .await
        .unwrap();
    assert!(matches!(first, WebhookOutcome::Accepted { .. }));

    let second = ingress
        .handle_notification(&push("couple@example.com", 3))
        .await
        .unwrap();
    assert_eq!(
        second,
        WebhookOutcome::EnqueueFailed {
            user_id: "u1".to_string(),
            history_id: 3
        }
    );
    assert_eq!(watches.get("u1").await.unwrap().unwrap().history_id, 3);
}

#[tokio::test]
async fn malformed_payload_is_rejected_before_touching_the_store() {
    let watches = watches_with_subscription("webhook-malformed", 1).await;
    let ingress = WebhookIngress::new(watches, Arc::new(RecordingQueue::default()), 20);

    let envelope: PushEnvelope = serde_json::from_value(json!({
        "message": {"data": base64::engine::general_purpose::STANDARD.encode("{\"historyId\": 5}")}
    }))
    .unwrap();
    let err = ingress.handle_notification(&envelope).await.unwrap_err();
    assert_eq!(err.kind(), "malformed_webhook");
}

#[tokio::test]
async fn pushes_for_an_expired_watch_are_ignored() {
    let watches = watches_with_subscription("webhook-expired", 10).await;
    watches.set_status("u1", WatchStatus::Expired).await.unwrap();
    let queue = Arc::new(RecordingQueue::default());
    let ingress = WebhookIngress::new(watches.clone(), queue.clone(), 20);

    let outcome = ingress
        .handle_notification(&push("couple@example.com", 11))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Inactive {
            user_id: "u1".to_string(),
            history_id: 11
        }
    );
    assert!(queue.requests.lock().unwrap().is_empty());
    assert_eq!(watches.get("u1").await.unwrap().unwrap().history_id, 10);
}
