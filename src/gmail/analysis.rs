//! Hand-off of scan requests to the external message-analysis pipeline.
//!
//! The webhook path only ever calls [`AnalysisQueue::enqueue`], which never waits. A background
//! dispatcher drains the queue and POSTs each request to the configured trigger URL.

use crate::gmail::policy::UPSTREAM_BODY_PREVIEW_CHARS;
use crate::utils::logging::debug_json;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use url::Url;
use vowmail_schema::ScanRequest;

const DISPATCH_CONCURRENCY: usize = 4;

static TRIGGER_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(3)
        .with_jitter()
});

#[derive(Debug, Clone, Copy, ThisError, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("analysis queue is full")]
    Full,
    #[error("analysis queue is closed")]
    Closed,
}

pub trait AnalysisQueue: Send + Sync {
    /// Non-blocking hand-off.
    fn enqueue(&self, request: ScanRequest) -> Result<(), EnqueueError>;
}

/// Bounded in-process queue in front of the dispatcher.
#[derive(Clone, Debug)]
pub struct ChannelAnalysisQueue {
    tx: mpsc::Sender<ScanRequest>,
}

impl ChannelAnalysisQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScanRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AnalysisQueue for ChannelAnalysisQueue {
    fn enqueue(&self, request: ScanRequest) -> Result<(), EnqueueError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Drain `rx`, delivering each request to `trigger_url`. Without a URL requests are logged
/// and discarded.
pub fn spawn_dispatcher(
    rx: mpsc::Receiver<ScanRequest>,
    trigger_url: Option<Url>,
    http: reqwest::Client,
) -> JoinHandle<()> {
    let trigger_url = trigger_url.map(Arc::new);
    tokio::spawn(async move {
        info!(
            trigger = trigger_url.as_deref().map_or("<none>", Url::as_str),
            concurrency = DISPATCH_CONCURRENCY,
            "analysis dispatcher started"
        );

        let mut pipeline = ReceiverStream::new(rx)
            .map(|request| {
                let http = http.clone();
                let trigger_url = trigger_url.clone();
                async move { dispatch(&http, trigger_url.as_deref(), request).await }
            })
            .buffer_unordered(DISPATCH_CONCURRENCY);

        while pipeline.next().await.is_some() {}

        info!("analysis dispatcher stopped");
    })
}

async fn dispatch(http: &reqwest::Client, trigger_url: Option<&Url>, request: ScanRequest) {
    let Some(url) = trigger_url else {
        info!(
            user_id = %request.user_id,
            request_id = %request.request_id,
            "no analysis trigger configured, scan request discarded"
        );
        return;
    };

    if let Some(body) = debug_json(&request) {
        debug!(body = %body, "dispatching scan request");
    }

    match post_scan_request(http, url, &request).await {
        Ok(resp) if resp.status().is_success() => {
            debug!(
                user_id = %request.user_id,
                request_id = %request.request_id,
                status = %resp.status(),
                "scan request delivered"
            );
        }
        Ok(resp) => {
            warn!(
                user_id = %request.user_id,
                request_id = %request.request_id,
                status = %resp.status(),
                "analysis trigger rejected scan request"
            );
        }
        Err(e) => {
            error!(
                user_id = %request.user_id,
                request_id = %request.request_id,
                error = %e,
                "analysis trigger unreachable, scan request lost"
            );
        }
    }
}

/// POST one scan request, retrying transport errors and 5xx answers from the trigger.
///
/// Any other status is handed back for the caller to log.
async fn post_scan_request(
    http: &reqwest::Client,
    url: &Url,
    request: &ScanRequest,
) -> Result<reqwest::Response, reqwest::Error> {
    (|| async move {
        let resp = http.post(url.clone()).json(request).send().await?;
        if !resp.status().is_server_error() {
            return Ok(resp);
        }
        let Err(err) = resp.error_for_status_ref().map(|_| ()) else {
            return Ok(resp);
        };

        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(bytes) => format!(
                "{:.len$}",
                String::from_utf8_lossy(&bytes),
                len = UPSTREAM_BODY_PREVIEW_CHARS
            ),
            Err(e) => format!("<unreadable body: {e}>"),
        };
        debug!(
            user_id = %request.user_id,
            request_id = %request.request_id,
            %status,
            body = %body,
            "analysis trigger failed"
        );
        Err(err)
    })
    .retry(*TRIGGER_RETRY_POLICY)
    .notify(|err, dur: Duration| {
        warn!(
            user_id = %request.user_id,
            error = %err,
            "scan request retrying in {dur:?}"
        );
    })
    .await
}
