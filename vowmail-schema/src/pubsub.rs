use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lax::u64_from_str_or_number;

/// Pub/Sub push delivery envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushEnvelope {
    pub message: PushMessage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushMessage {
    /// Base64 (standard alphabet) encoded JSON of [`GmailPushNotification`].
    pub data: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,

    #[serde(
        default,
        rename = "messageId",
        alias = "message_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

/// Decoded `message.data` of a Gmail push notification.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GmailPushNotification {
    pub email_address: String,

    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub history_id: u64,
}
