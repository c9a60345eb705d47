//! Sheet-status job: for every ticket row of the release sheet, write whether
//! its change request is reviewed, QA verified and merged.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::collab::{SheetRow, SheetSync, SourceControl, StatusColumns, TicketTracker};
use crate::error::{MergewardError, Result};
use crate::extract::ReferenceExtractor;
use crate::model::{ChangeRequest, RequestState, TicketId};
use crate::policy::{QA_LABELS, REVIEW_LABELS};
use crate::progress::ProgressHandle;

/// Percentage reported once the sheet has been read.
const READ_DONE: u8 = 10;
/// Share of the percentage spread across rows.
const ROW_SPAN: usize = 85;

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SheetStatusReport {
    pub rows: usize,
    pub updated: usize,
    pub failed: usize,
    pub no_mr: usize,
}

enum RowOutcome {
    Updated,
    NoMr,
}

pub struct SheetStatusJob {
    tracker: Arc<dyn TicketTracker>,
    scm: Arc<dyn SourceControl>,
    sheets: Arc<dyn SheetSync>,
    extractor: ReferenceExtractor,
    pacing: Duration,
}

impl SheetStatusJob {
    pub fn new(
        tracker: Arc<dyn TicketTracker>,
        scm: Arc<dyn SourceControl>,
        sheets: Arc<dyn SheetSync>,
        extractor: ReferenceExtractor,
    ) -> Self {
        Self {
            tracker,
            scm,
            sheets,
            extractor,
            pacing: Duration::from_secs(1),
        }
    }

    /// Delay between rows, to stay under the sheet API's rate limit.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn run(&self, progress: ProgressHandle) -> Result<SheetStatusReport> {
        info!("Reading tickets from sheet...");
        let rows = match self.sheets.read_ticket_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "Error in sheet updater");
                progress.fail(err.to_string());
                return Err(err);
            }
        };
        progress.advance(READ_DONE);

        let mut report = SheetStatusReport {
            rows: rows.len(),
            ..SheetStatusReport::default()
        };
        if rows.is_empty() {
            info!("No tickets found in sheet");
            progress.complete();
            return Ok(report);
        }

        let total = rows.len();
        info!("Processing {total} tickets");
        for (idx, row) in rows.iter().enumerate() {
            progress.advance(READ_DONE + (ROW_SPAN * (idx + 1) / total) as u8);
            info!(row = row.row, "Processing ticket {} at row {}", row.ticket, row.row);
            match self.update_row(row).await {
                Ok(RowOutcome::Updated) => report.updated += 1,
                Ok(RowOutcome::NoMr) => report.no_mr += 1,
                Err(err) => {
                    error!(row = row.row, error = %err, "Error processing ticket {}", row.ticket);
                    report.failed += 1;
                    continue;
                }
            }
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        info!("Sheet update completed:");
        info!("Total tickets processed: {total}");
        info!("Successful updates: {}", report.updated);
        info!("Failed updates: {}", report.failed);
        info!("Tickets without MR: {}", report.no_mr);
        progress.complete();
        Ok(report)
    }

    async fn update_row(&self, row: &SheetRow) -> Result<RowOutcome> {
        let id = parse_ticket_cell(&row.ticket).ok_or_else(|| {
            warn!("Invalid ticket number format: {}", row.ticket);
            MergewardError::Sheet(format!("invalid ticket number {:?}", row.ticket))
        })?;

        let ticket = self.tracker.fetch_by_id(id).await?.ok_or_else(|| {
            warn!(ticket = id, "Could not fetch ticket {id} from the tracker");
            MergewardError::Tracker(format!("ticket {id} not found"))
        })?;

        let urls = self.extractor.extract(&ticket.notes);
        if urls.is_empty() {
            info!(ticket = id, "No MR found for ticket {id}");
            self.sheets
                .update_status_columns(row.row, StatusColumns::default())
                .await?;
            return Ok(RowOutcome::NoMr);
        }

        let request = self.first_fetchable(&urls).await.ok_or_else(|| {
            error!(ticket = id, "Could not fetch any MR data for ticket {id}");
            MergewardError::SourceControl(format!("no fetchable MR for ticket {id}"))
        })?;

        let status = status_of(&request);
        info!(
            ticket = id,
            "Ticket {id}: Code Reviewed={}, QA Verified={}, Merged={}",
            status.reviewed,
            status.qa_verified,
            status.merged
        );
        self.sheets.update_status_columns(row.row, status).await?;
        Ok(RowOutcome::Updated)
    }

    async fn first_fetchable(&self, urls: &[String]) -> Option<ChangeRequest> {
        for url in urls {
            match self.scm.fetch_change_request(url).await {
                Ok(Some(cr)) => return Some(cr),
                Ok(None) => warn!(url = %url, "Could not fetch MR data for {url}"),
                Err(err) => warn!(url = %url, error = %err, "Could not fetch MR data for {url}"),
            }
        }
        None
    }
}

/// Ticket id from a sheet cell like `#4521` or ` 4521 `.
pub fn parse_ticket_cell(cell: &str) -> Option<TicketId> {
    let digits = cell.replace('#', "");
    let digits = digits.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sheet flags for a change request.
pub fn status_of(request: &ChangeRequest) -> StatusColumns {
    StatusColumns {
        reviewed: request.has_any_label(&REVIEW_LABELS),
        qa_verified: request.has_any_label(&QA_LABELS),
        merged: request.state == RequestState::Merged,
    }
}
