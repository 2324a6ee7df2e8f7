use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lax::u64_from_str_or_number;

/// Body of `POST users/me/watch`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub topic_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_filter_behavior: Option<String>,
}

impl WatchRequest {
    pub fn inbox_only(topic_name: impl Into<String>, label_ids: Vec<String>) -> Self {
        let label_filter_behavior = (!label_ids.is_empty()).then(|| "INCLUDE".to_string());
        Self {
            topic_name: topic_name.into(),
            label_ids,
            label_filter_behavior,
        }
    }
}

/// Response of `POST users/me/watch`.
///
/// `expiration` is epoch milliseconds encoded as a string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub history_id: u64,

    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub expiration: u64,
}

impl WatchResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.expiration).ok()?;
        DateTime::<Utc>::from_timestamp_millis(millis)
    }
}
