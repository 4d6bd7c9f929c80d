//! Best-effort side channels of a deploy
//!
//! None of these may fail a deploy: callers log their errors as warnings.

mod audit;
mod backup;
mod commit;
mod webhook;

pub use audit::AuditLog;
pub use backup::FileBackup;
pub use commit::GithubCommits;
pub use webhook::{Notification, WebhookNotifier, WebhookPayload};

use std::time::Duration;

use crate::error::Result;

const USER_AGENT: &str = concat!("convoy/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the sinks
pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?)
}
