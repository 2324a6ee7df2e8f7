use serde::{Deserialize, Serialize};

/// Message sent to the external message-analysis pipeline.
///
/// Carries only the user and a bound on how many new messages to fetch; the pipeline pulls the
/// mailbox itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub request_id: String,
    pub user_id: String,
    pub hint: ScanHint,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanHint {
    pub message_count: u32,
}
