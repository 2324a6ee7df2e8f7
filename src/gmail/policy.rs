//! Classification of non-2xx Gmail API responses into the failure taxonomy.

use crate::error::{AuthFailureReason, GmailError};
use crate::utils::logging::debug_json;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use vowmail_schema::GmailErrorBody;

pub const UPSTREAM_BODY_PREVIEW_CHARS: usize = 300;

const AUTH_REASONS: &[&str] = &["authError", "unauthorized", "invalidCredentials"];
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];
const SCOPE_REASONS: &[&str] = &["insufficientPermissions", "ACCESS_TOKEN_SCOPE_INSUFFICIENT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionForError {
    /// The grant is unusable; publish and fail without retry.
    Reauth(AuthFailureReason),
    /// Upstream throttled the user; `None` when no hint was given.
    RateLimit(Option<Duration>),
    /// 5xx; eligible for bounded retry.
    Retry,
    /// Any other 4xx; surfaced to the caller as-is.
    Reject,
}

pub trait MappingAction: std::fmt::Debug + DeserializeOwned + Serialize {
    fn try_match_rule(&self, status: StatusCode) -> Option<ActionForError>;

    fn action_from_status(status: StatusCode) -> ActionForError {
        match status {
            StatusCode::UNAUTHORIZED => ActionForError::Reauth(AuthFailureReason::ApiUnauthorized),
            StatusCode::TOO_MANY_REQUESTS => ActionForError::RateLimit(None),
            s if s.is_server_error() => ActionForError::Retry,
            _ => ActionForError::Reject,
        }
    }
}

impl MappingAction for GmailErrorBody {
    fn try_match_rule(&self, status: StatusCode) -> Option<ActionForError> {
        if self.has_reason(RATE_LIMIT_REASONS) || self.status_is("RESOURCE_EXHAUSTED") {
            return Some(ActionForError::RateLimit(None));
        }
        if status == StatusCode::FORBIDDEN && self.has_reason(SCOPE_REASONS) {
            return Some(ActionForError::Reauth(AuthFailureReason::ScopeMissing));
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            && (self.has_reason(AUTH_REASONS) || self.status_is("UNAUTHENTICATED"))
        {
            return Some(ActionForError::Reauth(AuthFailureReason::ApiUnauthorized));
        }
        None
    }
}

/// `Retry-After` as delta seconds; HTTP dates are ignored.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Consume a non-2xx response and decide what the caller should do with it.
pub async fn classify_upstream_error<E>(resp: reqwest::Response) -> (ActionForError, GmailError)
where
    E: MappingAction,
{
    let status = resp.status();
    let hint = retry_after_hint(resp.headers());
    let bytes = resp.bytes().await.unwrap_or_default();
    let raw_body = String::from_utf8_lossy(&bytes).into_owned();

    let action = match serde_json::from_slice::<E>(&bytes) {
        Ok(error) => {
            let matched = error.try_match_rule(status);
            let action = matched.unwrap_or_else(|| E::action_from_status(status));
            if let Some(body) = debug_json(&error) {
                tracing::debug!(
                    %status,
                    ?action,
                    rule_matched = matched.is_some(),
                    body = %body,
                    "Gmail structured error classified"
                );
            }
            action
        }
        Err(_) => {
            let action = E::action_from_status(status);
            tracing::debug!(
                %status,
                ?action,
                body = %format!("{:.len$}", raw_body, len = UPSTREAM_BODY_PREVIEW_CHARS),
                "Gmail unstructured error"
            );
            action
        }
    };

    let action = match action {
        ActionForError::RateLimit(None) => ActionForError::RateLimit(hint),
        other => other,
    };
    (action, error_for(action, status, &raw_body))
}

fn error_for(action: ActionForError, status: StatusCode, raw_body: &str) -> GmailError {
    match action {
        ActionForError::Reauth(reason) => GmailError::ReauthRequired { reason },
        ActionForError::RateLimit(retry_after) => GmailError::RateLimited { retry_after },
        ActionForError::Retry => GmailError::transient(format!("gmail api status {status}")),
        ActionForError::Reject => GmailError::Rejected {
            status: status.as_u16(),
            message: format!("{:.len$}", raw_body, len = UPSTREAM_BODY_PREVIEW_CHARS),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: serde_json::Value) -> GmailErrorBody {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn forbidden_rate_limit_reason_is_rate_limit() {
        let b = body(json!({"error": {"code": 403, "message": "slow down",
            "errors": [{"domain": "usageLimits", "reason": "userRateLimitExceeded"}]}}));
        assert_eq!(
            b.try_match_rule(StatusCode::FORBIDDEN),
            Some(ActionForError::RateLimit(None))
        );
    }

    #[test]
    fn forbidden_auth_reason_is_reauth() {
        let b = body(json!({"error": {"code": 403, "message": "nope",
            "status": "UNAUTHENTICATED"}}));
        assert_eq!(
            b.try_match_rule(StatusCode::FORBIDDEN),
            Some(ActionForError::Reauth(AuthFailureReason::ApiUnauthorized))
        );

        let b = body(json!({"error": {"code": 403, "message": "scope",
            "errors": [{"reason": "insufficientPermissions"}]}}));
        assert_eq!(
            b.try_match_rule(StatusCode::FORBIDDEN),
            Some(ActionForError::Reauth(AuthFailureReason::ScopeMissing))
        );
    }

    #[test]
    fn plain_forbidden_is_rejected_not_reauth() {
        let b = body(json!({"error": {"code": 403, "message": "Mail service not enabled",
            "errors": [{"reason": "failedPrecondition"}]}}));
        assert_eq!(b.try_match_rule(StatusCode::FORBIDDEN), None);
        assert_eq!(
            GmailErrorBody::action_from_status(StatusCode::FORBIDDEN),
            ActionForError::Reject
        );
    }

    #[test]
    fn status_fallbacks() {
        assert_eq!(
            GmailErrorBody::action_from_status(StatusCode::UNAUTHORIZED),
            ActionForError::Reauth(AuthFailureReason::ApiUnauthorized)
        );
        assert_eq!(
            GmailErrorBody::action_from_status(StatusCode::SERVICE_UNAVAILABLE),
            ActionForError::Retry
        );
        assert_eq!(
            GmailErrorBody::action_from_status(StatusCode::TOO_MANY_REQUESTS),
            ActionForError::RateLimit(None)
        );
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), None);
    }
}
