//! Run service: the entry points callers use to start runs and poll them.
//!
//! Each start request is admitted through the [`ProgressTracker`] and, when
//! accepted, spawned as its own task inside a `run` span. The caller gets the
//! task handle back immediately.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::collab::{Notifier, SheetSync, SourceControl, TicketTracker};
use crate::config::CategoryConfig;
use crate::error::{MergewardError, Result};
use crate::executor::MergeExecutor;
use crate::jobs::{
    CodeMoveJob, CodeMoveRequest, RelinkJob, RelinkRequest, SheetStatusJob, SheetStatusReport,
};
use crate::model::{RunCategory, TicketId};
use crate::obs;
use crate::progress::{ProgressHandle, ProgressTracker, RunProgress};
use crate::reconcile::{Reconciler, RunReport, TicketSource};

/// The external systems one lane talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tracker: Arc<dyn TicketTracker>,
    pub scm: Arc<dyn SourceControl>,
    pub sheets: Option<Arc<dyn SheetSync>>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Collaborators {
    pub fn new(tracker: Arc<dyn TicketTracker>, scm: Arc<dyn SourceControl>) -> Self {
        Self {
            tracker,
            scm,
            sheets: None,
            notifier: None,
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
}

/// Answer to a start request.
#[derive(Debug)]
pub enum StartRun<T> {
    Accepted {
        run_id: String,
        handle: JoinHandle<Result<T>>,
    },
    /// A run for the category is already in progress; nothing was queued.
    Busy,
}

impl<T> StartRun<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StartRun::Accepted { .. })
    }
}

/// Options for a reconciliation run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Tickets to cover; `None` means the category's configured filters.
    pub source: Option<TicketSource>,
    /// Post the summary when the run completes.
    pub notify: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            source: None,
            notify: true,
        }
    }
}

struct Lane {
    config: CategoryConfig,
    collab: Collaborators,
}

/// Per-category lanes plus the shared progress map.
pub struct MergeService {
    lanes: BTreeMap<RunCategory, Lane>,
    progress: ProgressTracker,
}

impl MergeService {
    pub fn new(progress: ProgressTracker) -> Self {
        Self {
            lanes: BTreeMap::new(),
            progress,
        }
    }

    pub fn with_lane(
        mut self,
        category: RunCategory,
        config: CategoryConfig,
        collab: Collaborators,
    ) -> Self {
        self.lanes.insert(category, Lane { config, collab });
        self
    }

    pub fn categories(&self) -> impl Iterator<Item = &RunCategory> {
        self.lanes.keys()
    }

    /// Latest status and percentage for `category`.
    pub fn progress(&self, category: &RunCategory) -> Result<RunProgress> {
        self.progress.snapshot(category)
    }

    pub fn progress_tracker(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Reconcile the category's filtered tickets and post the summary.
    pub fn start_run(&self, category: &RunCategory) -> Result<StartRun<RunReport>> {
        self.start_run_with(category, RunOptions::default())
    }

    pub fn start_run_with(
        &self,
        category: &RunCategory,
        options: RunOptions,
    ) -> Result<StartRun<RunReport>> {
        let lane = self.lane(category)?;
        let source = options
            .source
            .unwrap_or_else(|| TicketSource::Filter(lane.config.filter_ids.clone()));

        let executor = MergeExecutor::new(lane.collab.scm.clone(), lane.config.retry_policy());
        let mut reconciler = Reconciler::new(
            lane.collab.tracker.clone(),
            lane.collab.scm.clone(),
            executor,
            lane.config.reconcile_settings(category),
        );
        if let Some(sheets) = &lane.collab.sheets {
            reconciler = reconciler.with_sheets(sheets.clone());
        }
        if options.notify {
            if let Some(notifier) = &lane.collab.notifier {
                reconciler = reconciler.with_notifier(notifier.clone());
            }
        }

        self.admit(category, move |progress| async move {
            reconciler.run(&source, progress).await
        })
    }

    /// Mirror review, QA and merge flags into the release sheet.
    pub fn start_sheet_status(&self) -> Result<StartRun<SheetStatusReport>> {
        let category = RunCategory::new(RunCategory::SHEET_STATUS);
        let lane = self.lane(&category)?;
        let sheets = lane.collab.sheets.clone().ok_or_else(|| {
            MergewardError::Config(format!("{category} lane has no sheet configured"))
        })?;
        let job = SheetStatusJob::new(
            lane.collab.tracker.clone(),
            lane.collab.scm.clone(),
            sheets,
            lane.config.extractor(),
        )
        .with_pacing(lane.config.pacing());

        self.admit(&category, move |progress| async move { job.run(progress).await })
    }

    /// Clone tickets into code-move tickets.
    pub fn start_code_move(&self, request: CodeMoveRequest) -> Result<StartRun<Vec<TicketId>>> {
        let category = RunCategory::new(RunCategory::CODE_MOVE);
        let lane = self.lane(&category)?;
        let mut job = CodeMoveJob::new(lane.collab.tracker.clone())
            .with_control_ticket(lane.config.control_ticket);
        if let Some(sheets) = &lane.collab.sheets {
            job = job.with_sheets(sheets.clone());
        }

        self.admit(&category, move |progress| async move {
            job.run(&request, progress).await
        })
    }

    /// Move tickets between control tickets. Shares the regression lane.
    pub fn start_relink(&self, request: RelinkRequest) -> Result<StartRun<usize>> {
        let category = RunCategory::new(RunCategory::REGRESSION);
        let lane = self.lane(&category)?;
        let job = RelinkJob::new(lane.collab.tracker.clone());

        self.admit(&category, move |progress| async move {
            job.run(&request, progress).await
        })
    }

    fn lane(&self, category: &RunCategory) -> Result<&Lane> {
        self.lanes
            .get(category)
            .ok_or_else(|| MergewardError::UnknownCategory(category.clone()))
    }

    fn admit<T, F, Fut>(&self, category: &RunCategory, work: F) -> Result<StartRun<T>>
    where
        F: FnOnce(ProgressHandle) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let progress = match self.progress.start(category) {
            Ok(handle) => handle,
            Err(MergewardError::Busy { .. }) => {
                obs::emit_run_rejected(category, &self.progress.snapshot(category)?);
                return Ok(StartRun::Busy);
            }
            Err(err) => return Err(err),
        };

        let run_id = Uuid::new_v4().to_string();
        obs::emit_run_accepted(category, &run_id);

        let span = obs::run_span(category, &run_id);
        let task_run_id = run_id.clone();
        let fut = work(progress);
        let handle = tokio::spawn(
            async move {
                let started = Instant::now();
                let result = fut.await;
                let elapsed = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => obs::emit_run_finished(&task_run_id, elapsed, true),
                    Err(err) => {
                        obs::emit_run_failed(&task_run_id, err);
                        obs::emit_run_finished(&task_run_id, elapsed, false);
                    }
                }
                result
            }
            .instrument(span),
        );

        Ok(StartRun::Accepted { run_id, handle })
    }
}
