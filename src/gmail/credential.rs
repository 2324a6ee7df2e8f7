use crate::db::DbGmailCredential;
use crate::error::GmailError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const GMAIL_SCOPE_MARKER: &str = "/auth/gmail.";
const CALENDAR_SCOPE_MARKER: &str = "/auth/calendar";

/// One OAuth credential per user.
///
/// `refresh_token` only changes on a fresh consent; a refresh replaces `access_token` and
/// `expires_at` together. A record whose `refresh_token` is `None` has been revoked and
/// cannot be refreshed until the user consents again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub granted_scopes: BTreeSet<String>,
    pub mailbox_email: Option<String>,
}

impl CredentialRecord {
    /// Returns the cached access token when it outlives `margin`.
    pub fn usable_access_token(&self, now: DateTime<Utc>, margin: Duration) -> Option<&str> {
        let token = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        (self.expires_at - margin > now).then_some(token)
    }

    pub fn is_revoked(&self) -> bool {
        self.refresh_token.as_deref().is_none_or(str::is_empty)
    }

    pub fn has_gmail_scope(&self) -> bool {
        self.granted_scopes
            .iter()
            .any(|s| s.contains(GMAIL_SCOPE_MARKER))
    }

    /// Replace the access token pair after a successful token exchange.
    pub fn apply_refresh(&mut self, access_token: String, expires_in: Option<std::time::Duration>) {
        self.access_token = Some(access_token);
        self.expires_at = access_token_expiry(expires_in);
    }

    /// Remove the scopes covered by `scope`. Returns false when no product scope remains
    /// and the record should be deleted.
    pub fn drop_scope(&mut self, scope: CredentialScope) -> bool {
        match scope {
            CredentialScope::All => self.granted_scopes.clear(),
            CredentialScope::Gmail => self
                .granted_scopes
                .retain(|s| !s.contains(GMAIL_SCOPE_MARKER)),
            CredentialScope::Calendar => self
                .granted_scopes
                .retain(|s| !s.contains(CALENDAR_SCOPE_MARKER)),
        }
        self.granted_scopes
            .iter()
            .any(|s| s.contains(GMAIL_SCOPE_MARKER) || s.contains(CALENDAR_SCOPE_MARKER))
    }

    pub(crate) fn scopes_joined(&self) -> String {
        self.granted_scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Absolute expiry for a token response's `expires_in`; Google's one hour when absent.
pub fn access_token_expiry(expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let ttl = expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::hours(1));
    Utc::now() + ttl
}

impl From<DbGmailCredential> for CredentialRecord {
    fn from(d: DbGmailCredential) -> Self {
        CredentialRecord {
            user_id: d.user_id,
            access_token: d.access_token,
            refresh_token: d.refresh_token,
            expires_at: d.expires_at,
            granted_scopes: d
                .granted_scopes
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            mailbox_email: d.mailbox_email,
        }
    }
}

/// What a disconnect removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScope {
    Calendar,
    Gmail,
    #[default]
    All,
}

impl CredentialScope {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialScope::Calendar => "calendar",
            CredentialScope::Gmail => "gmail",
            CredentialScope::All => "all",
        }
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialScope {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calendar" => Ok(CredentialScope::Calendar),
            "gmail" => Ok(CredentialScope::Gmail),
            "all" => Ok(CredentialScope::All),
            other => Err(GmailError::Rejected {
                status: 400,
                message: format!("unknown credential scope '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scopes: &[&str]) -> CredentialRecord {
        CredentialRecord {
            user_id: "u1".to_string(),
            access_token: Some("at".to_string()),
            refresh_token: Some("rt".to_string()),
            expires_at: Utc::now() + Duration::minutes(30),
            granted_scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
            mailbox_email: Some("couple@example.com".to_string()),
        }
    }

    #[test]
    fn token_inside_margin_is_not_usable() {
        let mut rec = record(&[]);
        let now = Utc::now();
        assert_eq!(rec.usable_access_token(now, Duration::seconds(60)), Some("at"));

        rec.expires_at = now + Duration::seconds(30);
        assert_eq!(rec.usable_access_token(now, Duration::seconds(60)), None);
    }

    #[test]
    fn missing_refresh_token_means_revoked() {
        let mut rec = record(&[]);
        assert!(!rec.is_revoked());
        rec.refresh_token = Some(String::new());
        assert!(rec.is_revoked());
        rec.refresh_token = None;
        assert!(rec.is_revoked());
    }

    #[test]
    fn apply_refresh_keeps_refresh_token() {
        let mut rec = record(&[]);
        rec.apply_refresh("fresh".to_string(), Some(std::time::Duration::from_secs(3600)));
        assert_eq!(rec.access_token.as_deref(), Some("fresh"));
        assert_eq!(rec.refresh_token.as_deref(), Some("rt"));
        assert!(rec.expires_at > Utc::now() + Duration::minutes(59));
    }

    #[test]
    fn dropping_gmail_keeps_calendar_grant() {
        let mut rec = record(&[
            "https://www.googleapis.com/auth/gmail.readonly",
            "https://www.googleapis.com/auth/calendar.events",
            "openid",
        ]);
        assert!(rec.drop_scope(CredentialScope::Gmail));
        assert!(!rec.has_gmail_scope());
        assert!(!rec.drop_scope(CredentialScope::Calendar));
    }

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!("Gmail".parse::<CredentialScope>().unwrap(), CredentialScope::Gmail);
        assert!("mail".parse::<CredentialScope>().is_err());
    }
}
