//! Structured observability hooks for run lifecycle events.
//!
//! Every run executes inside [`run_span`], so all of its log lines carry the
//! category and run id. The `emit_*` functions log lifecycle milestones as
//! `event=<name>` records.

use tracing::{info, warn, Span};

use crate::model::RunCategory;
use crate::progress::RunProgress;

/// Span wrapping one run. Attach it with `tracing::Instrument`.
pub fn run_span(category: &RunCategory, run_id: &str) -> Span {
    tracing::info_span!("run", category = %category, run_id = %run_id)
}

pub fn emit_run_accepted(category: &RunCategory, run_id: &str) {
    info!(event = "run.accepted", category = %category, run_id = %run_id);
}

/// A start request found the category already running.
pub fn emit_run_rejected(category: &RunCategory, current: &RunProgress) {
    warn!(
        event = "run.rejected",
        category = %category,
        percentage = current.percentage,
        "a {category} run is already in progress"
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_can_be_entered() {
        let span = run_span(&RunCategory::new("regression"), "run-1");
        let _guard = span.enter();
        emit_run_accepted(&RunCategory::new("regression"), "run-1");
    }
}
