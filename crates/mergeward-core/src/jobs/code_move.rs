//! Code-move cloning job: create a code-move ticket for each original ticket,
//! relate the pair, and link the clone from the original's sheet row.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::collab::{NewTicket, SheetSync, TicketTracker};
use crate::error::{MergewardError, Result};
use crate::model::{TicketId, RECORD_TYPE_CODE_MOVE};
use crate::progress::{ticket_percentage, ProgressHandle};

const TITLE_LIMIT: usize = 128;
const TITLE_KEEP: usize = 125;

/// What to clone and with which release fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeMoveRequest {
    pub ticket_ids: Vec<TicketId>,
    pub er_date: NaiveDate,
    pub target_version: String,
    pub target_patch: String,
    pub qa_owner: String,
    pub instructions: String,
    pub title_prefix: String,
}

pub struct CodeMoveJob {
    tracker: Arc<dyn TicketTracker>,
    sheets: Option<Arc<dyn SheetSync>>,
    control_ticket: Option<TicketId>,
}

impl CodeMoveJob {
    pub fn new(tracker: Arc<dyn TicketTracker>) -> Self {
        Self {
            tracker,
            sheets: None,
            control_ticket: None,
        }
    }

    pub fn with_sheets(mut self, sheets: Arc<dyn SheetSync>) -> Self {
        self.sheets = Some(sheets);
        self
    }

    /// Relate every clone to this control ticket as well.
    pub fn with_control_ticket(mut self, control: Option<TicketId>) -> Self {
        self.control_ticket = control;
        self
    }

    /// Clone every ticket in order, returning the clone ids. The first
    /// failure ends the job in `error`.
    pub async fn run(&self, request: &CodeMoveRequest, progress: ProgressHandle) -> Result<Vec<TicketId>> {
        info!(
            "Started the cloning process for {} tickets having the title {}.",
            request.ticket_ids.len(),
            request.title_prefix
        );
        let mut clones = Vec::with_capacity(request.ticket_ids.len());
        for (idx, id) in request.ticket_ids.iter().enumerate() {
            match self.clone_one(*id, request).await {
                Ok(clone) => clones.push(clone),
                Err(err) => {
                    error!(ticket = id, error = %err, "Failed to create ticket for ID {id}");
                    progress.fail(err.to_string());
                    return Err(err);
                }
            }
            progress.advance(ticket_percentage(idx, request.ticket_ids.len()));
        }
        progress.complete();
        Ok(clones)
    }

    async fn clone_one(&self, id: TicketId, request: &CodeMoveRequest) -> Result<TicketId> {
        let original = self
            .tracker
            .fetch_by_id(id)
            .await?
            .ok_or_else(|| MergewardError::Tracker(format!("ticket {id} not found")))?;

        let new_ticket = NewTicket {
            template: id,
            summary: clone_title(&request.title_prefix, &original.summary),
            description: clone_description(&original.description, &request.instructions, id),
            record_type: RECORD_TYPE_CODE_MOVE.to_string(),
            target_version: request.target_version.clone(),
            target_patch: request.target_patch.clone(),
            qa_owner: request.qa_owner.clone(),
            er_date: request.er_date,
        };
        let clone = self.tracker.create_ticket(&new_ticket).await?;

        self.tracker.relate(id, clone).await?;
        if let Some(control) = self.control_ticket {
            self.tracker.relate(clone, control).await?;
        }
        info!(ticket = clone, "Ticket with ID {clone} successfully cloned");

        if let Some(sheets) = &self.sheets {
            let formula = clone_link_formula(&self.tracker.public_url(clone), clone);
            sheets.annotate_ticket_row(id, &formula).await?;
        }
        Ok(clone)
    }
}

/// `<b>{prefix}</b> {summary}`, cut to 125 characters plus `...` when the
/// result is longer than 128.
pub fn clone_title(prefix: &str, summary: &str) -> String {
    let title = format!("<b>{prefix}</b> {summary}");
    if title.chars().count() > TITLE_LIMIT {
        let mut cut: String = title.chars().take(TITLE_KEEP).collect();
        cut.push_str("...");
        cut
    } else {
        title
    }
}

pub fn clone_description(original: &str, instructions: &str, id: TicketId) -> String {
    format!("{original}\n\n{instructions}\n\nOriginal Ticket: <b>{id}</b>")
}

pub fn clone_link_formula(clone_url: &str, clone: TicketId) -> String {
    format!("=HYPERLINK(\"{clone_url}\", \"Code Move Ticket: MT#{clone}\")")
}
