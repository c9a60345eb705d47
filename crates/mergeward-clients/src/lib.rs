//! Mergeward HTTP clients
//!
//! reqwest implementations of the collaborator traits in `mergeward-core`:
//! - [`MantisClient`]: Mantis REST tracker
//! - [`GitLabClient`]: GitLab v4 merge requests
//! - [`SheetsClient`]: Google Sheets v4 values API
//! - [`ChatNotifier`]: incoming chat webhook

pub mod chat;
pub mod error;
pub mod gitlab;
pub mod mantis;
pub mod sheets;

use std::sync::Arc;
use std::time::Duration;

use mergeward_core::config::{ENV_GITLAB_TOKEN, ENV_SHEETS_TOKEN, ENV_TRACKER_TOKEN};
use mergeward_core::{CategoryConfig, Collaborators, MergewardError, Secrets};

pub use chat::ChatNotifier;
pub use error::{ClientError, Result};
pub use gitlab::GitLabClient;
pub use mantis::MantisClient;
pub use sheets::{column_letter, parse_sheet_key, SheetsClient};

pub(crate) const USER_AGENT: &str = concat!("mergeward/", env!("CARGO_PKG_VERSION"));

/// Upper bound on one request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client builder every service starts from.
pub(crate) fn http_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
}

fn setup(err: ClientError) -> MergewardError {
    MergewardError::Config(err.to_string())
}

/// Build the HTTP collaborators one lane needs from its config and the
/// environment's tokens. A sheet or webhook is wired only when configured.
pub fn build_collaborators(
    config: &CategoryConfig,
    secrets: &Secrets,
) -> mergeward_core::Result<Collaborators> {
    let tracker_token = Secrets::require(&secrets.tracker_token, ENV_TRACKER_TOKEN)?;
    let gitlab_token = Secrets::require(&secrets.gitlab_token, ENV_GITLAB_TOKEN)?;

    let tracker = MantisClient::new(&config.tracker_url, tracker_token).map_err(setup)?;
    let scm = GitLabClient::new(&config.gitlab_url, gitlab_token, config.projects.clone())
        .map_err(setup)?;
    let mut collab = Collaborators::new(Arc::new(tracker), Arc::new(scm));

    if let Some(sheet) = &config.sheet {
        let token = Secrets::require(&secrets.sheets_token, ENV_SHEETS_TOKEN)?;
        let client = SheetsClient::new(token, sheet.clone()).map_err(setup)?;
        collab = collab.with_sheets(Arc::new(client));
    }
    if let Some(webhook) = &config.webhook_url {
        collab = collab.with_notifier(Arc::new(ChatNotifier::new(webhook).map_err(setup)?));
    }
    Ok(collab)
}
