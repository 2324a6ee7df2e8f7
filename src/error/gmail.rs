use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

/// Why a user's Google authorization became unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    /// Token endpoint answered `invalid_grant`: the refresh token is revoked or expired.
    RefreshTokenRevoked,
    /// Gmail answered 401/403 with an auth-type body while we held a fresh access token.
    ApiUnauthorized,
    /// The grant no longer carries a Gmail scope (partial disconnect or narrowed consent).
    ScopeMissing,
}

impl AuthFailureReason {
    /// Wire name of the failure kind every reason belongs to.
    pub const KIND: &'static str = "reauth_required";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RefreshTokenRevoked => "refresh_token_revoked",
            Self::ApiUnauthorized => "api_unauthorized",
            Self::ScopeMissing => "scope_missing",
        }
    }
}

/// Failure taxonomy of the Gmail integration.
///
/// Cloneable: a single coalesced token refresh hands the same error to every waiter.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum GmailError {
    #[error("re-authorization required ({})", reason.as_str())]
    ReauthRequired { reason: AuthFailureReason },

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient upstream failure: {message}")]
    Transient { message: String },

    #[error("credential store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("malformed webhook payload: {message}")]
    MalformedWebhook { message: String },

    #[error("gmail is not connected for this user")]
    NotConnected,

    #[error("upstream rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GmailError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedWebhook {
            message: message.into(),
        }
    }

    /// Stable snake_case name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReauthRequired { .. } => AuthFailureReason::KIND,
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::MalformedWebhook { .. } => "malformed_webhook",
            Self::NotConnected => "not_connected",
            Self::Rejected { .. } => "rejected",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::ReauthRequired { .. })
    }
}

impl IsRetryable for GmailError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<reqwest::Error> for GmailError {
    fn from(e: reqwest::Error) -> Self {
        // Timeouts, connect failures and body read errors are all transport faults; a timed-out
        // call is never an auth failure.
        Self::Transient {
            message: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for GmailError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable {
            message: e.to_string(),
        }
    }
}

impl From<OauthError> for GmailError {
    fn from(e: OauthError) -> Self {
        match e {
            OauthError::ServerResponse { ref error, .. } if error == "invalid_grant" => {
                Self::ReauthRequired {
                    reason: AuthFailureReason::RefreshTokenRevoked,
                }
            }
            OauthError::ServerResponse { error, description } => Self::Rejected {
                status: 400,
                message: match description {
                    Some(description) => format!("token endpoint error {error}: {description}"),
                    None => format!("token endpoint error: {error}"),
                },
            },
            OauthError::Request(e) => e.into(),
            OauthError::Parse { message, .. } => Self::Transient { message },
            OauthError::Flow { message, .. } | OauthError::Other { message } => {
                Self::Internal(message)
            }
        }
    }
}
