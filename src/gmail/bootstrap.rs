use crate::config::GmailConfig;
use crate::db::{CredentialStore, WatchStore};
use crate::error::GmailError;
use crate::gmail::analysis::{AnalysisQueue, ChannelAnalysisQueue, spawn_dispatcher};
use crate::gmail::client::{GmailClient, build_http_client};
use crate::gmail::quota::QuotaGuard;
use crate::gmail::refresher::{self, TokenRefresherHandle};
use crate::gmail::watch::WatchManager;
use crate::gmail::webhook::WebhookIngress;
use crate::signal::{AuthFailureSignal, ReauthTracker};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Every Gmail component wired together over one credential store and one watch store.
///
/// Background tasks (auth-failure drain, analysis dispatcher) start here; the renewal sweep is
/// started by the caller so tests can drive sweeps by hand.
#[derive(Clone)]
pub struct GmailServices {
    pub cfg: Arc<GmailConfig>,
    pub http: reqwest::Client,
    pub credentials: Arc<dyn CredentialStore>,
    pub signal: AuthFailureSignal,
    pub tracker: ReauthTracker,
    pub quota: Arc<QuotaGuard>,
    pub refresher: TokenRefresherHandle,
    pub client: GmailClient,
    pub watch: Arc<WatchManager>,
    pub webhook: Arc<WebhookIngress>,
    tasks: Arc<Vec<JoinHandle<()>>>,
}

impl GmailServices {
    pub async fn spawn(
        cfg: Arc<GmailConfig>,
        credentials: Arc<dyn CredentialStore>,
        watches: Arc<dyn WatchStore>,
    ) -> Result<Self, GmailError> {
        let http = build_http_client(&cfg)?;
        let (queue, rx) = ChannelAnalysisQueue::new(cfg.analysis_queue_capacity);
        let dispatcher = spawn_dispatcher(rx, cfg.analysis_trigger_url.clone(), http.clone());
        Self::spawn_with_queue(cfg, credentials, watches, http, Arc::new(queue), vec![dispatcher])
            .await
    }

    /// Wire the services around a caller-provided analysis queue.
    pub async fn spawn_with_queue(
        cfg: Arc<GmailConfig>,
        credentials: Arc<dyn CredentialStore>,
        watches: Arc<dyn WatchStore>,
        http: reqwest::Client,
        queue: Arc<dyn AnalysisQueue>,
        mut tasks: Vec<JoinHandle<()>>,
    ) -> Result<Self, GmailError> {
        info!(
            api_url = %cfg.api_url,
            proxy = %cfg.proxy.as_ref().map_or("<none>", |u| u.as_str()),
            enable_multiplexing = cfg.enable_multiplexing,
            retry_max_times = cfg.retry_max_times,
            oauth_tps = cfg.oauth_tps,
            quota_window_limit = cfg.quota_window_limit,
            quota_window_secs = cfg.quota_window_secs,
            watch_topic = %cfg.watch_topic_name,
            "Gmail config (effective)"
        );

        let signal = AuthFailureSignal::default();
        let tracker = ReauthTracker::new(cfg.reauth_prompt_cooldown());
        tasks.push(tracker.spawn_drain(&signal));

        let quota = Arc::new(QuotaGuard::new(cfg.quota_window_limit, cfg.quota_window()));
        let refresher =
            refresher::spawn(cfg.clone(), credentials.clone(), signal.clone(), http.clone()).await;
        let client = GmailClient::new(
            &cfg,
            http.clone(),
            quota.clone(),
            refresher.clone(),
            signal.clone(),
        );
        let watch = Arc::new(WatchManager::new(
            cfg.clone(),
            client.clone(),
            watches.clone(),
            credentials.clone(),
            signal.clone(),
        ));
        let webhook = Arc::new(WebhookIngress::new(
            watches,
            queue,
            cfg.analysis_max_messages,
        ));

        Ok(Self {
            cfg,
            http,
            credentials,
            signal,
            tracker,
            quota,
            refresher,
            client,
            watch,
            webhook,
            tasks: Arc::new(tasks),
        })
    }

    /// Start the periodic watch renewal sweep.
    pub fn spawn_sweep(&self) -> JoinHandle<()> {
        self.watch.clone().spawn_sweep()
    }

    /// Abort background tasks owned by these services.
    pub fn shutdown(&self) {
        for task in self.tasks.iter() {
            task.abort();
        }
    }
}
