//! Per-run counters.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::events::RunEvent;

/// Counters for one reconciliation run. Built fresh per run from its events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub tickets_processed: u64,
    pub pending_qa: u64,
    pub pending_review: u64,
    pub invalid_branch: u64,
    pub merged: u64,
    pub already_merged: u64,
    pub merge_failures: u64,
    pub not_code_move_tested: u64,
    pub fetch_failures: u64,
    pub tickets_fixed: u64,
}

impl RunStatistics {
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::TicketStarted { .. } => self.tickets_processed += 1,
            RunEvent::QaPending { .. } => self.pending_qa += 1,
            RunEvent::ReviewPending { .. } => self.pending_review += 1,
            RunEvent::BranchMismatch { .. } => self.invalid_branch += 1,
            RunEvent::NotCodeMoveTested { .. } => self.not_code_move_tested += 1,
            RunEvent::Merged { .. } => self.merged += 1,
            RunEvent::AlreadyMerged { .. } => self.already_merged += 1,
            RunEvent::MergeFailed { .. } => self.merge_failures += 1,
            RunEvent::FetchFailed { .. } | RunEvent::MappingMissing { .. } => {
                self.fetch_failures += 1
            }
            RunEvent::TicketFixed { .. } | RunEvent::ClosedForSubmitter { .. } => {
                self.tickets_fixed += 1
            }
        }
    }

    /// Emit the end-of-run totals, one line each, then a structured flush.
    pub fn log_totals(&self, total_tickets: usize) {
        info!("Total Number of Tickets Processed: {total_tickets}");
        info!("Number of MR's in the QA Verification Queue: {}", self.pending_qa);
        info!("Number of MR's in the Code Review Queue: {}", self.pending_review);
        info!("Number of MR's with Wrong Target Branches: {}", self.invalid_branch);
        info!("Number of MR's Successfully Merged: {}", self.merged);
        info!(
            metric = "flush",
            tickets_processed = self.tickets_processed,
            pending_qa = self.pending_qa,
            pending_review = self.pending_review,
            invalid_branch = self.invalid_branch,
            merged = self.merged,
            already_merged = self.already_merged,
            merge_failures = self.merge_failures,
            fetch_failures = self.fetch_failures,
            tickets_fixed = self.tickets_fixed,
        );
    }
}
