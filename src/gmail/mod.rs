//! Gmail integration: credentials, token refresh, quota, API client, watch and webhook.

pub mod analysis;
pub mod bootstrap;
pub mod client;
pub mod credential;
pub mod policy;
pub mod quota;
pub mod refresher;
pub mod watch;
pub mod webhook;

pub use bootstrap::GmailServices;
pub use client::{CallPolicy, GmailClient, GmailOperation};
pub use credential::{CredentialRecord, CredentialScope};
pub use quota::{QuotaDecision, QuotaGuard};
pub use refresher::TokenRefresherHandle;
pub use watch::{RenewOutcome, SweepReport, WatchManager, WatchStatus, WatchSubscription};
pub use webhook::{WebhookIngress, WebhookOutcome};
