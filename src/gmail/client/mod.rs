pub mod api;
#[allow(clippy::module_inception)]
mod client;
pub mod oauth;

pub use api::{GmailApi, GmailOperation};
pub use client::{CallPolicy, GmailClient};

use crate::config::GmailConfig;
use crate::error::GmailError;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use std::time::Duration;

pub const GMAIL_USER_AGENT: &str = concat!("vowmail/", env!("CARGO_PKG_VERSION"));

/// reqwest client shared by Gmail, token endpoint and analysis trigger calls.
///
/// Every request carries the configured timeout; a timed-out call surfaces as `transient`.
pub fn build_http_client(cfg: &GmailConfig) -> Result<reqwest::Client, GmailError> {
    let mut headers = HeaderMap::new();
    let mut builder = reqwest::Client::builder()
        .user_agent(GMAIL_USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(5))
        .timeout(cfg.request_timeout());

    if let Some(proxy_url) = cfg.proxy.as_ref() {
        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| GmailError::Internal(format!("invalid proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }

    if cfg.enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    }

    builder
        .default_headers(headers)
        .build()
        .map_err(|e| GmailError::Internal(format!("failed to build reqwest client: {e}")))
}
