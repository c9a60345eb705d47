//! Typed run events.
//!
//! The reconciler records one [`RunEvent`] per observable outcome. The
//! recorder keeps them in order and maintains the run's statistics, so the
//! summary can be built without re-reading the log.

use serde::{Deserialize, Serialize};

use crate::model::TicketId;
use crate::stats::RunStatistics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    TicketStarted {
        ticket: TicketId,
        url: String,
    },
    ReviewPending {
        ticket: TicketId,
        url: String,
        reviewer: String,
    },
    QaPending {
        ticket: TicketId,
        url: String,
    },
    BranchMismatch {
        ticket: TicketId,
        url: String,
        expected: String,
        author: String,
    },
    NotCodeMoveTested {
        ticket: TicketId,
        url: String,
    },
    Merged {
        ticket: TicketId,
        url: String,
    },
    AlreadyMerged {
        ticket: TicketId,
        url: String,
    },
    MergeFailed {
        ticket: TicketId,
        url: String,
    },
    FetchFailed {
        ticket: TicketId,
        url: String,
    },
    MappingMissing {
        ticket: TicketId,
        url: String,
    },
    TicketFixed {
        ticket: TicketId,
    },
    ClosedForSubmitter {
        ticket: TicketId,
    },
}

/// Ordered event log plus the counters derived from it.
#[derive(Debug, Clone, Default)]
pub struct RunRecorder {
    events: Vec<RunEvent>,
    stats: RunStatistics,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: RunEvent) {
        self.stats.apply(&event);
        self.events.push(event);
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn into_parts(self) -> (RunStatistics, Vec<RunEvent>) {
        (self.stats, self.events)
    }
}
