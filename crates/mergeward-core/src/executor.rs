//! Merge executor: idempotent merge attempts with bounded retry.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collab::SourceControl;
use crate::error::{MergewardError, Result};
use crate::model::{ChangeRequest, RequestState};
use crate::retry::{retry, RetryPolicy};

/// Merges change requests through a [`SourceControl`] host.
pub struct MergeExecutor {
    scm: Arc<dyn SourceControl>,
    policy: RetryPolicy,
}

impl MergeExecutor {
    pub fn new(scm: Arc<dyn SourceControl>, policy: RetryPolicy) -> Self {
        Self { scm, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Merge `request`, returning whether it ended up merged.
    ///
    /// A request the host already reports as merged is a success without a
    /// merge call. An attempt only counts when the host confirms the merged
    /// state, either in the merge response or on a follow-up fetch.
    pub async fn attempt_merge(&self, request: &ChangeRequest) -> bool {
        let url = request.url.as_str();

        match self.scm.fetch_change_request(url).await {
            Ok(Some(current)) if current.state == RequestState::Merged => {
                info!(url = %url, "Merge request {url} is already merged");
                return true;
            }
            Ok(_) => {}
            Err(err) => debug!(url = %url, error = %err, "pre-merge fetch failed"),
        }

        let outcome = retry(&self.policy, url, |attempt| async move {
            debug!(url = %url, attempt, "attempting merge");
            self.merge_once(url).await
        })
        .await;

        if outcome.succeeded() {
            true
        } else {
            warn!(url = %url, attempts = outcome.attempts, "merge did not complete");
            false
        }
    }

    async fn merge_once(&self, url: &str) -> Result<()> {
        let receipt = match self.scm.merge(url).await {
            Ok(receipt) => receipt,
            Err(err) => {
                // The host rejects merging a request another merger already merged.
                return match self.scm.fetch_change_request(url).await {
                    Ok(Some(cr)) if cr.state == RequestState::Merged => {
                        info!(url = %url, "Merge request {url} was merged concurrently");
                        Ok(())
                    }
                    _ => Err(err),
                };
            }
        };
        if receipt.is_merged() {
            return Ok(());
        }
        // Accepted but not reported merged: another merger may have raced us.
        match self.scm.fetch_change_request(url).await? {
            Some(cr) if cr.state == RequestState::Merged => Ok(()),
            _ => Err(MergewardError::MergeNotSettled {
                url: url.to_string(),
            }),
        }
    }
}
