pub mod config;
pub mod db;
pub mod error;
pub mod gmail;
pub mod server;
pub mod signal;
pub(crate) mod utils;

pub use error::{GmailError, VowmailError};
pub use gmail::{GmailServices, credential::CredentialRecord};
pub use signal::{AuthFailureEvent, AuthFailureSignal};
