mod gmail;
mod oauth;
mod vowmail;

pub use gmail::{AuthFailureReason, GmailError};
pub use oauth::OauthError;
pub use vowmail::{ApiErrorBody, ApiErrorObject, VowmailError};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
