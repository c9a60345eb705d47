//! Mergeward Core Library
//!
//! Reconciles tracker tickets against the merge state of the change requests
//! their notes reference, merges what review and QA policy allow, and drives
//! fully merged tickets to Fixed.

pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod extract;
pub mod fakes;
pub mod jobs;
pub mod model;
pub mod obs;
pub mod policy;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod service;
pub mod stats;
pub mod summary;
pub mod telemetry;

pub use collab::{
    MergeReceipt, NewTicket, Notifier, SheetRow, SheetSync, SourceControl, StatusColumns,
    TicketTracker,
};
pub use config::{CategoryConfig, MergeRetryConfig, Secrets, SheetConfig};
pub use error::{MergewardError, Result};
pub use events::{RunEvent, RunRecorder};
pub use executor::MergeExecutor;
pub use extract::{original_ticket_ref, ReferenceExtractor};
pub use jobs::{
    CodeMoveJob, CodeMoveRequest, RelinkJob, RelinkRequest, SheetStatusJob, SheetStatusReport,
};
pub use model::{
    ChangeRequest, RepoArea, RequestState, RunCategory, Ticket, TicketId, TicketKind,
    RESOLUTION_FIXED, RESOLUTION_FOR_SUBMITTER,
};
pub use policy::{evaluate, EligibilityVerdict, Evaluation, TargetBranches};
pub use progress::{ProgressHandle, ProgressTracker, RunProgress, RunStatus};
pub use reconcile::{ReconcileSettings, Reconciler, RunReport, TicketSource};
pub use retry::{retry, RetryOutcome, RetryPolicy};
pub use service::{Collaborators, MergeService, RunOptions, StartRun};
pub use stats::RunStatistics;
pub use summary::SummaryBuckets;
