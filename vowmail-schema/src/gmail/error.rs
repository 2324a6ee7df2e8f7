use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Google API error envelope (`{"error": {...}}`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GmailErrorBody {
    #[serde(rename = "error")]
    #[serde(default)]
    pub inner: GmailErrorObject,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GmailErrorObject {
    #[serde(default)]
    pub code: u16,

    #[serde(default)]
    pub message: String,

    /// Canonical status string, e.g. `UNAUTHENTICATED` or `RESOURCE_EXHAUSTED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GmailErrorDetail>,

    #[serde(flatten)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GmailErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GmailErrorBody {
    /// All `errors[].reason` values, in order.
    pub fn reasons(&self) -> impl Iterator<Item = &str> {
        self.inner
            .errors
            .iter()
            .filter_map(|detail| detail.reason.as_deref())
    }

    pub fn has_reason(&self, wanted: &[&str]) -> bool {
        self.reasons().any(|reason| wanted.contains(&reason))
    }

    pub fn status_is(&self, wanted: &str) -> bool {
        self.inner.status.as_deref() == Some(wanted)
    }
}
