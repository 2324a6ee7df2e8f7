mod error;
mod profile;
mod watch;

pub use error::{GmailErrorBody, GmailErrorDetail, GmailErrorObject};
pub use profile::GmailProfile;
pub use watch::{WatchRequest, WatchResponse};
