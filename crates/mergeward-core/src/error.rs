//! Error taxonomy for the reconciliation engine.

use crate::model::RunCategory;

/// Mergeward domain errors.
#[derive(Debug, thiserror::Error)]
pub enum MergewardError {
    #[error("a run for category {category} is already in progress")]
    Busy { category: RunCategory },

    #[error("unknown run category: {0}")]
    UnknownCategory(RunCategory),

    #[error("no target branch mapping for change request {url}")]
    MissingMapping { url: String },

    #[error("merge of {url} did not settle")]
    MergeNotSettled { url: String },

    #[error("tracker error: {0}")]
    Tracker(String),

    #[error("source control error: {0}")]
    SourceControl(String),

    #[error("sheet error: {0}")]
    Sheet(String),

    #[error("notifier error: {0}")]
    Notifier(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, MergewardError>;
