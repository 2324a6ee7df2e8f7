use crate::VowmailError;
use crate::error::OauthError;
use crate::gmail::client::CallPolicy;
use crate::gmail::client::oauth::endpoints::GmailOauthEndpoints;
use crate::gmail::client::oauth::google::GoogleTokenResponse;
use crate::gmail::credential::CredentialRecord;
use crate::server::router::VowmailState;
use crate::utils::jwt::email_from_id_token;
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::Utc;
use oauth2::{AuthorizationCode, PkceCodeChallenge, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use time::Duration;
use tracing::{error, info, warn};

const CSRF_COOKIE: &str = "gmail_oauth_csrf_token";
const PKCE_COOKIE: &str = "gmail_oauth_pkce_verifier";
const USER_COOKIE: &str = "gmail_oauth_user_id";

#[derive(Debug, Deserialize)]
pub struct AuthEntryQuery {
    pub user_id: String,
    #[serde(default)]
    pub login_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: String,
    pub state: String,
}

struct OauthSession {
    pkce_verifier: String,
    csrf_token: String,
    user_id: String,
}

/// GET /gmail/auth?user_id=...
///
/// Starts the Google OAuth2 PKCE flow for one application user and redirects the browser to
/// the consent page.
pub async fn gmail_oauth_entry(
    State(state): State<VowmailState>,
    Query(query): Query<AuthEntryQuery>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, VowmailError> {
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(OauthError::Flow {
            code: "MISSING_USER_ID".to_string(),
            message: "user_id must not be empty".to_string(),
            details: None,
        }
        .into());
    }

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) = GmailOauthEndpoints::build_authorize_url(
        &state.services.cfg,
        challenge,
        query.login_hint.as_deref(),
    );

    let secure = !state.insecure_cookie;
    let jar = jar
        .add(build_cookie(
            CSRF_COOKIE,
            csrf_token.secret().to_string(),
            secure,
        ))
        .add(build_cookie(
            PKCE_COOKIE,
            verifier.secret().to_string(),
            secure,
        ))
        .add(build_cookie(USER_COOKIE, user_id.to_string(), secure));

    info!(user_id, "Dispatching Gmail OAuth redirect");
    Ok((jar, Redirect::temporary(auth_url.as_ref())).into_response())
}

/// GET /oauth2callback
///
/// Stores the consented credential and clears the user's re-auth flag.
pub async fn gmail_oauth_callback(
    State(state): State<VowmailState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> impl IntoResponse {
    let (jar, session) = take_oauth_cookies(jar);

    match complete_consent(&state, &query, session).await {
        Ok(record) => {
            info!(
                user_id = %record.user_id,
                mailbox = record.mailbox_email.as_deref().unwrap_or("<unknown>"),
                "Gmail OAuth callback accepted"
            );
            let body = json!({
                "userId": record.user_id,
                "mailboxEmail": record.mailbox_email,
                "scopes": record.granted_scopes,
            });
            (jar, Json(body)).into_response()
        }
        Err(err) => {
            error!("Gmail OAuth failure: {:?}", err);
            (jar, err.into_response()).into_response()
        }
    }
}

async fn complete_consent(
    state: &VowmailState,
    query: &AuthCallbackQuery,
    session: Option<OauthSession>,
) -> Result<CredentialRecord, VowmailError> {
    let session = session.ok_or_else(|| OauthError::Flow {
        code: "OAUTH_SESSION_MISSING".to_string(),
        message: "Missing OAuth session cookies".to_string(),
        details: None,
    })?;

    if query.state != session.csrf_token {
        return Err(OauthError::Flow {
            code: "CSRF_MISMATCH".to_string(),
            message: "CSRF token mismatch".to_string(),
            details: None,
        }
        .into());
    }

    let services = &state.services;
    let token = GmailOauthEndpoints::exchange_authorization_code(
        &services.cfg,
        AuthorizationCode::new(query.code.clone()),
        PkceCodeVerifier::new(session.pkce_verifier),
        services.http.clone(),
    )
    .await
    .map_err(|e| OauthError::Flow {
        code: "TOKEN_EXCHANGE_FAILED".to_string(),
        message: format!("Token exchange failed: {e}"),
        details: None,
    })?;

    let mut record = record_from_consent(session.user_id, &token, &services.cfg.oauth_scopes)?;
    services.credentials.put(record.clone()).await?;
    // A new consent always replaces the stale flag, even if the profile lookup below fails.
    services.tracker.mark_consented(&record.user_id);

    if record.mailbox_email.is_none() {
        match services
            .client
            .get_profile(&record.user_id, CallPolicy::Interactive)
            .await
        {
            Ok(profile) => {
                record.mailbox_email = Some(profile.email_address);
                services.credentials.put(record.clone()).await?;
            }
            Err(e) => {
                warn!(user_id = %record.user_id, error = %e, "mailbox lookup after consent failed");
            }
        }
    }

    Ok(record)
}

fn record_from_consent(
    user_id: String,
    token: &GoogleTokenResponse,
    requested_scopes: &[String],
) -> Result<CredentialRecord, OauthError> {
    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OauthError::Flow {
            code: "MISSING_REFRESH_TOKEN".to_string(),
            message: "Missing refresh_token (check access_type=offline)".to_string(),
            details: None,
        })?;

    // Google omits `scope` when nothing changed; fall back to what was requested.
    let granted_scopes: BTreeSet<String> = token.scopes().map_or_else(
        || requested_scopes.iter().cloned().collect(),
        |scopes| scopes.iter().map(|s| s.to_string()).collect(),
    );

    let mailbox_email = token
        .extra_fields()
        .id_token
        .as_deref()
        .and_then(email_from_id_token);

    let mut record = CredentialRecord {
        user_id,
        access_token: None,
        refresh_token: Some(refresh_token),
        expires_at: Utc::now(),
        granted_scopes,
        mailbox_email,
    };
    record.apply_refresh(token.access_token().secret().to_string(), token.expires_in());
    Ok(record)
}

fn take_oauth_cookies(jar: PrivateCookieJar) -> (PrivateCookieJar, Option<OauthSession>) {
    let csrf = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let pkce = jar.get(PKCE_COOKIE).map(|c| c.value().to_string());
    let user = jar.get(USER_COOKIE).map(|c| c.value().to_string());

    let jar = jar
        .remove(Cookie::from(CSRF_COOKIE))
        .remove(Cookie::from(PKCE_COOKIE))
        .remove(Cookie::from(USER_COOKIE));

    match (pkce, csrf, user) {
        (Some(pkce_verifier), Some(csrf_token), Some(user_id)) => (
            jar,
            Some(OauthSession {
                pkce_verifier,
                csrf_token,
                user_id,
            }),
        ),
        _ => (jar, None),
    }
}

fn build_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::minutes(15))
        .build()
}
