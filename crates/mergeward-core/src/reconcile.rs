//! Ticket reconciler: the run driver.
//!
//! For each ticket: extract references, classify each change request, merge
//! the eligible ones and, once every evaluated request is merged, mark the
//! ticket Fixed. Processing is strictly sequential. Per-reference problems
//! (fetch failures, missing branch mappings, merges that never settle) block
//! the ticket but not the run; a failing tracker mutation aborts the run.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::collab::{Notifier, SheetSync, SourceControl, TicketTracker};
use crate::error::Result;
use crate::events::{RunEvent, RunRecorder};
use crate::executor::MergeExecutor;
use crate::extract::ReferenceExtractor;
use crate::model::{
    ChangeRequest, RequestState, RunCategory, Ticket, TicketId, RESOLUTION_FIXED,
    RESOLUTION_FOR_SUBMITTER,
};
use crate::policy::{self, EligibilityVerdict, TargetBranches};
use crate::progress::{ticket_percentage, ProgressHandle};
use crate::stats::RunStatistics;
use crate::summary::SummaryBuckets;

/// Note left on a code-move ticket closed without merging.
pub const FOR_SUBMITTER_NOTE: &str =
    "Closing this ticket as the <b>code move is not required</b> as per the developer's investigation";

/// Per-category knobs for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub category: RunCategory,
    /// Tag marking a ticket whose requests wait on code review.
    pub review_awaited_tag: Option<u64>,
    pub target_branches: TargetBranches,
    /// Whether fully merged tickets are resolved as Fixed.
    pub mark_fixed: bool,
    pub extractor: ReferenceExtractor,
}

/// Which tickets a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketSource {
    /// Union of the tracker's saved filters.
    Filter(Vec<u64>),
    /// An explicit list of ticket ids.
    Ids(Vec<TicketId>),
}

/// Result of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub total_tickets: usize,
    pub statistics: RunStatistics,
    pub events: Vec<RunEvent>,
}

impl RunReport {
    pub fn summary(&self) -> SummaryBuckets {
        SummaryBuckets::from_events(&self.events)
    }
}

/// Drives one category's reconciliation runs.
pub struct Reconciler {
    tracker: Arc<dyn TicketTracker>,
    scm: Arc<dyn SourceControl>,
    sheets: Option<Arc<dyn SheetSync>>,
    notifier: Option<Arc<dyn Notifier>>,
    executor: MergeExecutor,
    settings: ReconcileSettings,
}

/// Per-ticket aggregate while its references are processed.
struct TicketState {
    all_merged: bool,
    evaluated: usize,
    tags: Vec<u64>,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<dyn TicketTracker>,
        scm: Arc<dyn SourceControl>,
        executor: MergeExecutor,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            tracker,
            scm,
            sheets: None,
            notifier: None,
            executor,
            settings,
        }
    }

    pub fn with_sheets(mut self, sheets: Arc<dyn SheetSync>) -> Self {
        self.sheets = Some(sheets);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Run to completion, reporting progress through `progress`.
    ///
    /// On error the progress slot is set to `error` with the message, the
    /// statistics gathered so far are logged, and the error is returned.
    pub async fn run(&self, source: &TicketSource, progress: ProgressHandle) -> Result<RunReport> {
        let mut rec = RunRecorder::new();
        match self.run_inner(source, &progress, &mut rec).await {
            Ok(total_tickets) => {
                let (statistics, events) = rec.into_parts();
                let report = RunReport {
                    total_tickets,
                    statistics,
                    events,
                };
                if total_tickets > 0 {
                    report.statistics.log_totals(total_tickets);
                    self.notify(&report).await;
                }
                progress.complete();
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "Error in automation: {err}");
                rec.stats().log_totals(rec.stats().tickets_processed as usize);
                progress.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        source: &TicketSource,
        progress: &ProgressHandle,
        rec: &mut RunRecorder,
    ) -> Result<usize> {
        let tickets = self.load(source).await?;
        if tickets.is_empty() {
            info!("No tickets found for the given filter.");
            return Ok(0);
        }

        let total = tickets.len();
        info!("Found {total} tickets to review");

        for (idx, ticket) in tickets.iter().enumerate() {
            self.reconcile_ticket(ticket, rec).await?;
            progress.advance(ticket_percentage(idx, total));
        }
        Ok(total)
    }

    async fn load(&self, source: &TicketSource) -> Result<Vec<Ticket>> {
        match source {
            TicketSource::Filter(filter_ids) => self.tracker.fetch_by_filter(filter_ids).await,
            TicketSource::Ids(ids) => {
                let mut tickets = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.tracker.fetch_by_id(*id).await? {
                        Some(t) => tickets.push(t),
                        None => warn!(ticket = id, "Ticket {id} not found, skipping it"),
                    }
                }
                Ok(tickets)
            }
        }
    }

    async fn reconcile_ticket(&self, ticket: &Ticket, rec: &mut RunRecorder) -> Result<()> {
        let id = ticket.id;
        let ticket_url = self.tracker.public_url(id);
        info!(ticket = id, "Ticket to process: {ticket_url}");
        rec.record(RunEvent::TicketStarted {
            ticket: id,
            url: ticket_url.clone(),
        });

        if let Some(original) = ticket.original_ticket.filter(|_| ticket.is_code_move()) {
            if ticket.resolution == RESOLUTION_FOR_SUBMITTER {
                return self.close_for_submitter(ticket, original, &ticket_url, rec).await;
            }
        }

        let references = self.settings.extractor.extract(&ticket.notes);
        if references.is_empty() {
            info!(ticket = id, "No merge requests found in ticket: {id}");
            return Ok(());
        }

        let mut state = TicketState {
            all_merged: true,
            evaluated: 0,
            tags: ticket.tags.clone(),
        };
        for url in &references {
            self.reconcile_reference(ticket, url, &ticket_url, &mut state, rec)
                .await?;
        }

        if state.all_merged && state.evaluated > 0 {
            self.finish_ticket(ticket, &ticket_url, rec).await?;
        }
        Ok(())
    }

    async fn reconcile_reference(
        &self,
        ticket: &Ticket,
        url: &str,
        ticket_url: &str,
        state: &mut TicketState,
        rec: &mut RunRecorder,
    ) -> Result<()> {
        let id = ticket.id;

        let request = match self.scm.fetch_change_request(url).await {
            Ok(Some(cr)) => cr,
            outcome => {
                let cause = outcome.err().map(|e| e.to_string());
                self.block_on_fetch(id, url, cause.as_deref(), state, rec);
                return Ok(());
            }
        };

        if request.state == RequestState::Closed {
            info!(ticket = id, url = %url, "The MR {url} is closed. Going to the next MR.");
            return Ok(());
        }
        state.evaluated += 1;

        let expected = match self.settings.target_branches.expected_for(url) {
            Ok(branch) => branch,
            Err(err) => {
                error!(ticket = id, url = %url, "{err}");
                rec.record(RunEvent::MappingMissing {
                    ticket: id,
                    url: url.to_string(),
                });
                state.all_merged = false;
                return Ok(());
            }
        };

        let evaluation = policy::evaluate(&request, ticket.kind, expected);

        if request.state == RequestState::Merged {
            info!(ticket = id, url = %url, "The MR {url} is already merged, Ticket: {ticket_url}");
            rec.record(RunEvent::AlreadyMerged {
                ticket: id,
                url: url.to_string(),
            });
            return Ok(());
        }

        if evaluation.is_eligible() {
            self.detach_review_tag(id, state).await?;
            return self
                .merge_reference(ticket, &request, expected, ticket_url, state, rec)
                .await;
        }

        info!(ticket = id, url = %url, "{} for: {url}", evaluation.reason);
        state.all_merged = false;
        match evaluation.verdict {
            EligibilityVerdict::PendingQa => rec.record(RunEvent::QaPending {
                ticket: id,
                url: url.to_string(),
            }),
            EligibilityVerdict::PendingReview => {
                self.attach_review_tag(id, state).await?;
                rec.record(RunEvent::ReviewPending {
                    ticket: id,
                    url: url.to_string(),
                    reviewer: policy::reviewer_of(&request).to_string(),
                });
            }
            EligibilityVerdict::BranchMismatch => rec.record(RunEvent::BranchMismatch {
                ticket: id,
                url: url.to_string(),
                expected: expected.to_string(),
                author: request.author.clone().unwrap_or_else(|| "Unknown".into()),
            }),
            EligibilityVerdict::NotCodeMoveTested => rec.record(RunEvent::NotCodeMoveTested {
                ticket: id,
                url: url.to_string(),
            }),
            EligibilityVerdict::Eligible | EligibilityVerdict::Ineligible => {}
        }
        Ok(())
    }

    fn block_on_fetch(
        &self,
        id: TicketId,
        url: &str,
        cause: Option<&str>,
        state: &mut TicketState,
        rec: &mut RunRecorder,
    ) {
        match cause {
            Some(cause) => warn!(ticket = id, url = %url, error = %cause, "Unable to fetch MR data for: {url}"),
            None => info!(ticket = id, url = %url, "Unable to fetch MR data for: {url}"),
        }
        info!(ticket = id, "Skipping rest of the operations for ticket {id}");
        rec.record(RunEvent::FetchFailed {
            ticket: id,
            url: url.to_string(),
        });
        state.all_merged = false;
    }

    async fn merge_reference(
        &self,
        ticket: &Ticket,
        request: &ChangeRequest,
        branch: &str,
        ticket_url: &str,
        state: &mut TicketState,
        rec: &mut RunRecorder,
    ) -> Result<()> {
        let id = ticket.id;
        let url = request.url.as_str();

        if !self.executor.attempt_merge(request).await {
            info!(ticket = id, url = %url, "Unable to merge MR: {url} despite trying");
            info!(ticket = id, "Skipping rest of the operations for ticket {id}");
            rec.record(RunEvent::MergeFailed {
                ticket: id,
                url: url.to_string(),
            });
            state.all_merged = false;
            return Ok(());
        }

        let note = merge_note(url, branch, ticket.is_code_move());
        info!(ticket = id, url = %url, "Merge request {url} successfully merged. Ticket ID: {ticket_url}");
        self.tracker.add_note(id, &note).await?;
        rec.record(RunEvent::Merged {
            ticket: id,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn detach_review_tag(&self, id: TicketId, state: &mut TicketState) -> Result<()> {
        let Some(tag) = self.settings.review_awaited_tag else {
            return Ok(());
        };
        if state.tags.contains(&tag) {
            self.tracker.remove_tags(id, &[tag]).await?;
            state.tags.retain(|t| *t != tag);
        }
        Ok(())
    }

    async fn attach_review_tag(&self, id: TicketId, state: &mut TicketState) -> Result<()> {
        let Some(tag) = self.settings.review_awaited_tag else {
            return Ok(());
        };
        if !state.tags.contains(&tag) {
            self.tracker.add_tags(id, &[tag]).await?;
            state.tags.push(tag);
        }
        Ok(())
    }

    async fn finish_ticket(
        &self,
        ticket: &Ticket,
        ticket_url: &str,
        rec: &mut RunRecorder,
    ) -> Result<()> {
        if !self.settings.mark_fixed {
            info!(ticket = ticket.id, "All MRs merged for ticket {}", ticket.id);
            return Ok(());
        }
        self.tracker.set_resolution(ticket.id, RESOLUTION_FIXED).await?;
        info!(ticket = ticket.id, "Ticket {} marked as Fixed", ticket.id);
        rec.record(RunEvent::TicketFixed { ticket: ticket.id });

        if let Some(original) = ticket.original_ticket.filter(|_| ticket.is_code_move()) {
            let formula = completion_formula(ticket_url, ticket.id);
            self.propagate(original, &formula).await;
        }
        Ok(())
    }

    async fn close_for_submitter(
        &self,
        ticket: &Ticket,
        original: TicketId,
        ticket_url: &str,
        rec: &mut RunRecorder,
    ) -> Result<()> {
        let id = ticket.id;
        self.tracker.add_note(id, FOR_SUBMITTER_NOTE).await?;
        self.tracker.set_resolution(id, RESOLUTION_FIXED).await?;
        self.tracker.close(id).await?;
        self.propagate(original, &for_submitter_formula(ticket_url, id))
            .await;
        info!(ticket = id, "For Submitter Code move ticket {id} has been closed.");
        rec.record(RunEvent::ClosedForSubmitter { ticket: id });
        Ok(())
    }

    /// Cross-reference failures are logged; the ticket mutation already
    /// happened and is not rolled back.
    async fn propagate(&self, original: TicketId, formula: &str) {
        let Some(sheets) = &self.sheets else {
            warn!(ticket = original, "No sheet configured, cross-reference for {original} skipped");
            return;
        };
        if let Err(err) = sheets.propagate_cross_reference(original, formula).await {
            error!(ticket = original, error = %err, "Unable to update sheet row for ticket {original}");
        }
    }

    async fn notify(&self, report: &RunReport) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let message = report.summary().render(&self.settings.category);
        match notifier.post(&message).await {
            Ok(()) => info!("Summary posted successfully."),
            Err(err) => warn!(error = %err, "Failed to post summary"),
        }
    }
}

/// Ticket note recording a merge.
pub fn merge_note(url: &str, branch: &str, code_move: bool) -> String {
    let subject = if code_move { "The code move MR" } else { "The MR" };
    format!("{subject} <b>{url}</b> has been merged into <b>{branch}</b>.")
}

/// Sheet formula linking an original ticket to its finished code move.
pub fn completion_formula(ticket_url: &str, id: TicketId) -> String {
    format!("=HYPERLINK(\"{ticket_url}\", \"Code move done in ticket MT#{id}\")")
}

/// Sheet formula recording that a code move was not needed.
pub fn for_submitter_formula(ticket_url: &str, id: TicketId) -> String {
    format!(
        "=HYPERLINK(\"{ticket_url}\", \"Code move not required as per the developer's investigation, details in ticket MT#{id}\")"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_note_mentions_branch() {
        assert_eq!(
            merge_note("http://g/x/merge_requests/1", "release/6.1", false),
            "The MR <b>http://g/x/merge_requests/1</b> has been merged into <b>release/6.1</b>."
        );
        assert!(merge_note("u", "b", true).starts_with("The code move MR"));
    }

    #[test]
    fn formulas_quote_url_and_id() {
        assert_eq!(
            completion_formula("http://t/view.php?id=7", 7),
            "=HYPERLINK(\"http://t/view.php?id=7\", \"Code move done in ticket MT#7\")"
        );
        assert!(for_submitter_formula("http://t/view.php?id=7", 7)
            .contains("details in ticket MT#7"));
    }
}
