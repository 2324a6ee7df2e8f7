use super::IsRetryable;
use oauth2::basic::BasicErrorResponseType;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde_json::Value;
use thiserror::Error as ThisError;

/// Token endpoint bodies quoted in parse errors are cut to this many characters.
const BODY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, ThisError)]
pub enum OauthError {
    /// Consent flow failure surfaced to the browser with a stable `code`.
    #[error("gmail consent failed: {message}")]
    Flow {
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error("token endpoint unreachable: {0}")]
    Request(#[from] reqwest::Error),

    /// OAuth error body from Google, e.g. `invalid_grant` for a revoked refresh token.
    #[error("token endpoint refused the grant: {error}")]
    ServerResponse {
        error: String,
        description: Option<String>,
    },

    /// Non-JSON or unexpected body; Google's 5xx pages land here.
    #[error("unreadable token endpoint response ({message}): {body}")]
    Parse { message: String, body: String },

    #[error("token exchange failed: {message}")]
    Other { message: String },
}

impl IsRetryable for OauthError {
    fn is_retryable(&self) -> bool {
        matches!(self, OauthError::Request(_) | OauthError::Parse { .. })
    }
}

type TokenEndpointError = RequestTokenError<
    HttpClientError<oauth2::reqwest::Error>,
    StandardErrorResponse<BasicErrorResponseType>,
>;

impl From<TokenEndpointError> for OauthError {
    fn from(e: TokenEndpointError) -> Self {
        match e {
            RequestTokenError::ServerResponse(resp) => OauthError::ServerResponse {
                error: resp.error().to_string(),
                description: resp.error_description().cloned(),
            },
            RequestTokenError::Request(HttpClientError::Reqwest(err)) => OauthError::Request(*err),
            RequestTokenError::Request(other) => OauthError::Other {
                message: other.to_string(),
            },
            RequestTokenError::Parse(err, body) => OauthError::Parse {
                message: err.to_string(),
                body: body_preview(&body),
            },
            RequestTokenError::Other(message) => OauthError::Other { message },
        }
    }
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...<truncated>", &text[..cut]),
        None => text.into_owned(),
    }
}
