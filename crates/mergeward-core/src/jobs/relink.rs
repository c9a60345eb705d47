//! Control-ticket relink job: move a batch of tickets from an old control
//! ticket to a new one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::collab::TicketTracker;
use crate::error::Result;
use crate::model::TicketId;
use crate::progress::{ticket_percentage, ProgressHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinkRequest {
    pub ticket_ids: Vec<TicketId>,
    pub new_control: TicketId,
    pub old_control: TicketId,
}

pub struct RelinkJob {
    tracker: Arc<dyn TicketTracker>,
}

impl RelinkJob {
    pub fn new(tracker: Arc<dyn TicketTracker>) -> Self {
        Self { tracker }
    }

    /// Note, relate and unrelate each ticket in order. Any tracker failure
    /// ends the job in `error`; tickets already moved stay moved.
    pub async fn run(&self, request: &RelinkRequest, progress: ProgressHandle) -> Result<usize> {
        let total = request.ticket_ids.len();
        info!("Found {total} tickets to review");
        for (idx, id) in request.ticket_ids.iter().enumerate() {
            if let Err(err) = self.relink(*id, request).await {
                error!(ticket = id, error = %err, "Error in automation");
                progress.fail(err.to_string());
                return Err(err);
            }
            progress.advance(ticket_percentage(idx, total));
        }
        progress.complete();
        Ok(total)
    }

    async fn relink(&self, id: TicketId, request: &RelinkRequest) -> Result<()> {
        let note = relink_note(request.new_control, request.old_control);
        self.tracker.add_note(id, &note).await?;
        self.tracker.relate(id, request.new_control).await?;
        self.tracker.unrelate(id, request.old_control).await?;
        info!(ticket = id, "Updated the details for {}", self.tracker.public_url(id));
        Ok(())
    }
}

pub fn relink_note(new_control: TicketId, old_control: TicketId) -> String {
    format!(
        "Relating the ticket to <b>MT#{new_control}</b> and removing its link from <b>MT#{old_control}</b>."
    )
}
