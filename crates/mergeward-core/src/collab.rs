//! Collaborator interfaces.
//!
//! The engine talks to the outside world only through these traits:
//! - `TicketTracker`: ticket reads and mutations
//! - `SourceControl`: change-request lookup and merge
//! - `SheetSync`: release spreadsheet reads and writes
//! - `Notifier`: chat summary delivery
//!
//! HTTP implementations live in `mergeward-clients`; in-memory fakes for
//! tests live in [`crate::fakes`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ChangeRequest, RequestState, Ticket, TicketId};

/// Data for a ticket the engine creates (code-move clones).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    /// Ticket the new one is cloned from; project and category are copied.
    pub template: TicketId,
    pub summary: String,
    pub description: String,
    pub record_type: String,
    pub target_version: String,
    pub target_patch: String,
    pub qa_owner: String,
    pub er_date: NaiveDate,
}

/// Ticket tracker operations.
#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// Every ticket matched by any of the saved filters, de-duplicated.
    async fn fetch_by_filter(&self, filter_ids: &[u64]) -> Result<Vec<Ticket>>;

    /// One ticket, or `None` if the tracker does not know it.
    async fn fetch_by_id(&self, id: TicketId) -> Result<Option<Ticket>>;

    async fn set_resolution(&self, id: TicketId, resolution: &str) -> Result<()>;

    async fn add_note(&self, id: TicketId, text: &str) -> Result<()>;

    async fn add_tags(&self, id: TicketId, tags: &[u64]) -> Result<()>;

    async fn remove_tags(&self, id: TicketId, tags: &[u64]) -> Result<()>;

    async fn close(&self, id: TicketId) -> Result<()>;

    /// Create a ticket and return its identifier.
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<TicketId>;

    async fn relate(&self, id: TicketId, other: TicketId) -> Result<()>;

    async fn unrelate(&self, id: TicketId, other: TicketId) -> Result<()>;

    /// Browser URL for a ticket.
    fn public_url(&self, id: TicketId) -> String;
}

/// What the host reported back from a merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReceipt {
    /// Request state in the host's response, if it sent one.
    pub state: Option<RequestState>,
}

impl MergeReceipt {
    pub fn merged() -> Self {
        Self {
            state: Some(RequestState::Merged),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.state == Some(RequestState::Merged)
    }
}

/// Source-control host operations.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch a change request; `None` when the host has no such request.
    /// A URL that names no configured project is an error.
    async fn fetch_change_request(&self, url: &str) -> Result<Option<ChangeRequest>>;

    /// Ask the host to merge. A transport or status error is `Err`; an
    /// accepted call that did not merge comes back as a receipt whose state
    /// is not `Merged`.
    async fn merge(&self, url: &str) -> Result<MergeReceipt>;
}

/// One ticket row of the release sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    /// 1-based sheet row.
    pub row: u32,
    /// Raw cell text from the ticket column.
    pub ticket: String,
}

/// Status flags written into a ticket's row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusColumns {
    pub reviewed: bool,
    pub qa_verified: bool,
    pub merged: bool,
}

/// Release spreadsheet operations.
#[async_trait]
pub trait SheetSync: Send + Sync {
    /// Write `formula` into the original ticket's row of the code-move sheet
    /// and mark its dev status done.
    async fn propagate_cross_reference(&self, original: TicketId, formula: &str) -> Result<()>;

    /// Write `formula` into the original ticket's comment cell only.
    async fn annotate_ticket_row(&self, original: TicketId, formula: &str) -> Result<()>;

    /// Ticket rows of the status worksheet (header row excluded).
    async fn read_ticket_rows(&self) -> Result<Vec<SheetRow>>;

    /// Write review, QA and merge flags into one row in a single update.
    async fn update_status_columns(&self, row: u32, status: StatusColumns) -> Result<()>;
}

/// Chat delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post `text` once. Non-success responses are errors; callers decide
    /// whether they matter.
    async fn post(&self, text: &str) -> Result<()>;
}
