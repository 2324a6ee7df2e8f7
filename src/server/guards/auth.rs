use crate::server::router::VowmailState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

const KEY_HEADER: &str = "x-vowmail-key";

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(k) = headers.get(KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(k.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

pub(crate) fn extract_query_param(query: Option<&str>, name: &str) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    })
}

pub(crate) fn tokens_match(given: &str, expected: &str) -> bool {
    !expected.is_empty() && given.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Shared-key guard for the internal API (`x-vowmail-key`, bearer token or `?key=`).
#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<VowmailState> for RequireKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &VowmailState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_header_token(&parts.headers)
            .or_else(|| extract_query_param(parts.uri.query(), "key"));

        match token {
            Some(key) if tokens_match(&key, &state.vowmail_key) => Ok(RequireKeyAuth),
            Some(_) => Err(AuthError::InvalidKey),
            None => Err(AuthError::MissingKey),
        }
    }
}

/// Pub/Sub push guard: the subscription's push endpoint carries `?token=`.
#[derive(Debug, Clone, Copy)]
pub struct RequireWebhookToken;

impl FromRequestParts<VowmailState> for RequireWebhookToken {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &VowmailState,
    ) -> Result<Self, Self::Rejection> {
        match extract_query_param(parts.uri.query(), "token") {
            Some(token) if tokens_match(&token, &state.webhook_token) => Ok(RequireWebhookToken),
            Some(_) => Err(AuthError::InvalidKey),
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let reason = match self {
            AuthError::MissingKey => "Missing API key",
            AuthError::InvalidKey => "Invalid API key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
