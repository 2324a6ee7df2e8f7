use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

use super::gmail::GmailError;
use super::oauth::OauthError;

#[derive(Debug, ThisError)]
pub enum VowmailError {
    #[error(transparent)]
    Gmail(#[from] GmailError),

    #[error(transparent)]
    Oauth(#[from] OauthError),
}

impl IntoResponse for VowmailError {
    fn into_response(self) -> axum::response::Response {
        let mut retry_after = None;
        let (status, error_body) = match self {
            VowmailError::Gmail(err) => {
                let status = match &err {
                    GmailError::ReauthRequired { .. } => StatusCode::UNAUTHORIZED,
                    GmailError::RateLimited { retry_after: hint } => {
                        retry_after = *hint;
                        StatusCode::TOO_MANY_REQUESTS
                    }
                    GmailError::Transient { .. } | GmailError::StoreUnavailable { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    GmailError::MalformedWebhook { .. } => StatusCode::BAD_REQUEST,
                    GmailError::NotConnected => StatusCode::NOT_FOUND,
                    GmailError::Rejected { .. } => StatusCode::BAD_GATEWAY,
                    GmailError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match &err {
                    GmailError::Internal(_) | GmailError::StoreUnavailable { .. } => {
                        "An internal server error occurred.".to_string()
                    }
                    other => other.to_string(),
                };
                (
                    status,
                    ApiErrorObject {
                        code: err.kind().to_uppercase(),
                        message,
                        details: None,
                    },
                )
            }

            VowmailError::Oauth(OauthError::Flow {
                code,
                message,
                details,
            }) => (
                StatusCode::FORBIDDEN,
                ApiErrorObject {
                    code,
                    message,
                    details,
                },
            ),

            VowmailError::Oauth(err) => {
                let gmail = GmailError::from(err);
                return VowmailError::Gmail(gmail).into_response();
            }
        };

        let mut resp = (status, Json(ApiErrorBody { inner: error_body })).into_response();
        if let Some(delay) = retry_after
            && let Ok(value) = HeaderValue::from_str(&delay.as_secs().max(1).to_string())
        {
            resp.headers_mut().insert(RETRY_AFTER, value);
        }
        resp
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}
