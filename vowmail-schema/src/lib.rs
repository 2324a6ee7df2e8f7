pub mod analysis;
pub mod gmail;
pub mod pubsub;

mod lax;

pub use analysis::{ScanHint, ScanRequest};
pub use gmail::{
    GmailErrorBody, GmailErrorDetail, GmailErrorObject, GmailProfile, WatchRequest, WatchResponse,
};
pub use pubsub::{GmailPushNotification, PushEnvelope, PushMessage};
