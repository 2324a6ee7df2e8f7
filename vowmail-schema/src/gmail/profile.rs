use serde::{Deserialize, Serialize};

use crate::lax::opt_u64_from_str_or_number;

/// Response of `GET users/me/profile`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,

    #[serde(default, deserialize_with = "opt_u64_from_str_or_number")]
    pub history_id: Option<u64>,

    #[serde(default)]
    pub messages_total: Option<u64>,
}
