use super::OAUTH_RETRY_POLICY;
use super::google::{GoogleTokenResponse, google_client};
use crate::config::GmailConfig;
use crate::error::{IsRetryable, OauthError};
use backon::Retryable;
use oauth2::{
    AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RefreshToken, Scope,
};
use std::time::Duration;
use tracing::{info, warn};

/// Stateless Google OAuth endpoints built from [`GmailConfig`].
pub struct GmailOauthEndpoints;

impl GmailOauthEndpoints {
    /// Consent URL with configured scopes, PKCE challenge and offline access.
    ///
    /// `prompt=consent` makes Google issue a new refresh token on every consent.
    pub(crate) fn build_authorize_url(
        cfg: &GmailConfig,
        pkce_challenge: PkceCodeChallenge,
        login_hint: Option<&str>,
    ) -> (url::Url, CsrfToken) {
        let client = google_client(cfg);
        let mut req = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .add_extra_param("include_granted_scopes", "true");

        if let Some(hint) = login_hint.filter(|h| !h.is_empty()) {
            req = req.add_extra_param("login_hint", hint.to_string());
        }

        for scope in &cfg.oauth_scopes {
            req = req.add_scope(Scope::new(scope.clone()));
        }

        req.url()
    }

    /// Exchange an authorization code (PKCE) for tokens.
    pub(crate) async fn exchange_authorization_code(
        cfg: &GmailConfig,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        http_client: reqwest::Client,
    ) -> Result<GoogleTokenResponse, OauthError> {
        let client = google_client(cfg);

        let token_result: GoogleTokenResponse = client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(&http_client)
            .await?;

        info!("Gmail OAuth2 code exchange completed successfully");
        Ok(token_result)
    }

    /// One `refresh_token` grant exchange.
    pub(crate) async fn refresh_access_token(
        cfg: &GmailConfig,
        refresh_token: &str,
        http_client: reqwest::Client,
    ) -> Result<GoogleTokenResponse, OauthError> {
        let client = google_client(cfg);

        let token_result: GoogleTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await?;
        Ok(token_result)
    }

    /// Refresh with retries on transport faults and 5xx; `invalid_grant` is returned at once.
    pub(crate) async fn refresh_access_token_with_retry(
        cfg: &GmailConfig,
        refresh_token: &str,
        http_client: reqwest::Client,
    ) -> Result<GoogleTokenResponse, OauthError> {
        let retry_policy = *OAUTH_RETRY_POLICY;
        (|| async { Self::refresh_access_token(cfg, refresh_token, http_client.clone()).await })
            .retry(retry_policy)
            .when(|e: &OauthError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    "gmail token refresh retrying after error {}, sleeping {:?}",
                    err, dur
                );
            })
            .await
    }

    /// Refresh an access token, returning the raw JSON body.
    ///
    /// Keeps crate-private oauth2 response types out of the public API.
    pub async fn refresh_access_token_raw(
        cfg: &GmailConfig,
        refresh_token: &str,
        http_client: reqwest::Client,
    ) -> Result<serde_json::Value, OauthError> {
        let token = Self::refresh_access_token(cfg, refresh_token, http_client).await?;
        serde_json::to_value(&token).map_err(|e| OauthError::Other {
            message: format!("failed to serialize oauth token response: {e}"),
        })
    }
}
