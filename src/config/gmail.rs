use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Gmail integration configuration managed by Figment.
///
/// Every field has a default so tests can start from `GmailConfig::default()` and override only
/// what they point at local mock servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GmailConfig {
    /// Gmail REST base URL (the `gmail/v1/users/...` paths are joined onto it).
    /// TOML: `gmail.api_url`. Default: `https://gmail.googleapis.com`.
    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// Optional upstream HTTP proxy for Gmail and token endpoint calls.
    /// TOML: `gmail.proxy`. Example: `http://127.0.0.1:1080`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Allow HTTP/2 multiplexing for reqwest clients; disabled forces HTTP/1.
    /// TOML: `gmail.enable_multiplexing`. Default: `false`.
    #[serde(default)]
    pub enable_multiplexing: bool,

    /// Per-request timeout for every outbound Gmail / token call, in seconds.
    /// TOML: `gmail.request_timeout_secs`. Default: `15`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Max retry attempts for transient Gmail failures on the background path.
    /// TOML: `gmail.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// OAuth client id of the Google Cloud project.
    /// TOML: `gmail.oauth_client_id`. Must be provided.
    #[serde(default)]
    pub oauth_client_id: String,

    /// OAuth client secret of the Google Cloud project.
    /// TOML: `gmail.oauth_client_secret`.
    #[serde(default)]
    pub oauth_client_secret: String,

    /// TOML: `gmail.oauth_auth_url`. Default: Google's v2 auth endpoint.
    #[serde(default = "default_oauth_auth_url")]
    pub oauth_auth_url: Url,

    /// TOML: `gmail.oauth_token_url`. Default: `https://oauth2.googleapis.com/token`.
    #[serde(default = "default_oauth_token_url")]
    pub oauth_token_url: Url,

    /// Redirect URI registered for the consent flow; must route to `/oauth2callback`.
    /// TOML: `gmail.oauth_redirect_url`. Default: `http://localhost:8190/oauth2callback`.
    #[serde(default = "default_oauth_redirect_url")]
    pub oauth_redirect_url: Url,

    /// Scopes requested on consent.
    /// TOML: `gmail.oauth_scopes`.
    #[serde(default = "default_oauth_scopes")]
    pub oauth_scopes: Vec<String>,

    /// Token endpoint exchanges per second across all users.
    /// TOML: `gmail.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// A cached access token is reused only while it expires further out than this margin.
    /// TOML: `gmail.token_refresh_margin_secs`. Default: `60`.
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,

    /// Gmail calls allowed per user per quota window.
    /// TOML: `gmail.quota_window_limit`. Default: `120`.
    #[serde(default = "default_quota_window_limit")]
    pub quota_window_limit: u32,

    /// Length of the per-user quota window, in seconds.
    /// TOML: `gmail.quota_window_secs`. Default: `60`.
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,

    /// Longest a background call sleeps waiting for quota before failing `rate_limited`.
    /// TOML: `gmail.quota_max_wait_secs`. Default: `30`.
    #[serde(default = "default_quota_max_wait_secs")]
    pub quota_max_wait_secs: u64,

    /// Pub/Sub topic Gmail publishes mailbox changes to.
    /// TOML: `gmail.watch_topic_name`. Example: `projects/my-project/topics/gmail-push`.
    #[serde(default)]
    pub watch_topic_name: String,

    /// Label ids the watch is filtered to; empty watches the whole mailbox.
    /// TOML: `gmail.watch_label_ids`. Default: `["INBOX"]`.
    #[serde(default = "default_watch_label_ids")]
    pub watch_label_ids: Vec<String>,

    /// Watches expiring within this margin are renewed by the sweep, in seconds.
    /// TOML: `gmail.watch_renewal_margin_secs`. Default: `86400` (24h).
    #[serde(default = "default_watch_renewal_margin_secs")]
    pub watch_renewal_margin_secs: u64,

    /// Interval between renewal sweeps, in seconds.
    /// TOML: `gmail.watch_sweep_interval_secs`. Default: `43200` (12h).
    #[serde(default = "default_watch_sweep_interval_secs")]
    pub watch_sweep_interval_secs: u64,

    /// Upper bound for one user's renewal inside a sweep, in seconds.
    /// TOML: `gmail.watch_renewal_timeout_secs`. Default: `60`.
    #[serde(default = "default_watch_renewal_timeout_secs")]
    pub watch_renewal_timeout_secs: u64,

    /// Concurrent renewals within one sweep.
    /// TOML: `gmail.watch_sweep_concurrency`. Default: `4`.
    #[serde(default = "default_watch_sweep_concurrency")]
    pub watch_sweep_concurrency: usize,

    /// Verification token expected as `?token=` on the Pub/Sub push endpoint.
    /// TOML: `gmail.webhook_token`. Must be provided.
    #[serde(default)]
    pub webhook_token: String,

    /// Endpoint of the message-analysis pipeline; unset logs and drops scan requests.
    /// TOML: `gmail.analysis_trigger_url`.
    #[serde(default)]
    pub analysis_trigger_url: Option<Url>,

    /// Upper bound on new messages the pipeline fetches per trigger.
    /// TOML: `gmail.analysis_max_messages`. Default: `20`.
    #[serde(default = "default_analysis_max_messages")]
    pub analysis_max_messages: u32,

    /// Capacity of the in-process scan request queue.
    /// TOML: `gmail.analysis_queue_capacity`. Default: `1024`.
    #[serde(default = "default_analysis_queue_capacity")]
    pub analysis_queue_capacity: usize,

    /// After a user dismisses or is shown the re-auth prompt, it stays hidden this long.
    /// TOML: `gmail.reauth_prompt_cooldown_secs`. Default: `300`.
    #[serde(default = "default_reauth_prompt_cooldown_secs")]
    pub reauth_prompt_cooldown_secs: u64,
}

impl GmailConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn token_refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.token_refresh_margin_secs).unwrap_or(60))
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs.max(1))
    }

    pub fn quota_max_wait(&self) -> Duration {
        Duration::from_secs(self.quota_max_wait_secs)
    }

    pub fn watch_renewal_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.watch_renewal_margin_secs).unwrap_or(86_400))
    }

    pub fn watch_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.watch_sweep_interval_secs.max(1))
    }

    pub fn watch_renewal_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_renewal_timeout_secs.max(1))
    }

    pub fn reauth_prompt_cooldown(&self) -> Duration {
        Duration::from_secs(self.reauth_prompt_cooldown_secs)
    }
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            proxy: None,
            enable_multiplexing: false,
            request_timeout_secs: default_request_timeout_secs(),
            retry_max_times: default_retry_max_times(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_auth_url: default_oauth_auth_url(),
            oauth_token_url: default_oauth_token_url(),
            oauth_redirect_url: default_oauth_redirect_url(),
            oauth_scopes: default_oauth_scopes(),
            oauth_tps: default_oauth_tps(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
            quota_window_limit: default_quota_window_limit(),
            quota_window_secs: default_quota_window_secs(),
            quota_max_wait_secs: default_quota_max_wait_secs(),
            watch_topic_name: String::new(),
            watch_label_ids: default_watch_label_ids(),
            watch_renewal_margin_secs: default_watch_renewal_margin_secs(),
            watch_sweep_interval_secs: default_watch_sweep_interval_secs(),
            watch_renewal_timeout_secs: default_watch_renewal_timeout_secs(),
            watch_sweep_concurrency: default_watch_sweep_concurrency(),
            webhook_token: String::new(),
            analysis_trigger_url: None,
            analysis_max_messages: default_analysis_max_messages(),
            analysis_queue_capacity: default_analysis_queue_capacity(),
            reauth_prompt_cooldown_secs: default_reauth_prompt_cooldown_secs(),
        }
    }
}

fn default_api_url() -> Url {
    Url::parse("https://gmail.googleapis.com").expect("default gmail api_url must be a valid URL")
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_retry_max_times() -> usize {
    3
}

fn default_oauth_auth_url() -> Url {
    Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
        .expect("default oauth_auth_url must be a valid URL")
}

fn default_oauth_token_url() -> Url {
    Url::parse("https://oauth2.googleapis.com/token")
        .expect("default oauth_token_url must be a valid URL")
}

fn default_oauth_redirect_url() -> Url {
    Url::parse("http://localhost:8190/oauth2callback")
        .expect("default oauth_redirect_url must be a valid URL")
}

fn default_oauth_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
        "https://www.googleapis.com/auth/gmail.readonly".to_string(),
        "https://www.googleapis.com/auth/gmail.send".to_string(),
        "https://www.googleapis.com/auth/calendar.events".to_string(),
    ]
}

fn default_oauth_tps() -> usize {
    5
}

fn default_token_refresh_margin_secs() -> u64 {
    60
}

fn default_quota_window_limit() -> u32 {
    120
}

fn default_quota_window_secs() -> u64 {
    60
}

fn default_quota_max_wait_secs() -> u64 {
    30
}

fn default_watch_label_ids() -> Vec<String> {
    vec!["INBOX".to_string()]
}

fn default_watch_renewal_margin_secs() -> u64 {
    24 * 60 * 60
}

fn default_watch_sweep_interval_secs() -> u64 {
    12 * 60 * 60
}

fn default_watch_renewal_timeout_secs() -> u64 {
    60
}

fn default_watch_sweep_concurrency() -> usize {
    4
}

fn default_analysis_max_messages() -> u32 {
    20
}

fn default_analysis_queue_capacity() -> usize {
    1024
}

fn default_reauth_prompt_cooldown_secs() -> u64 {
    300
}
