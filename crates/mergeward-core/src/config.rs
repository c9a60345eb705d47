//! Layered JSON configuration.
//!
//! Each category reads, lowest precedence first:
//! 1. built-in defaults for the category,
//! 2. `<dir>/common.json`,
//! 3. `<dir>/<category>.json`.
//!
//! Layers are merged key by key at the top level, then deserialized into a
//! [`CategoryConfig`]. Secrets never live in these files; see [`Secrets`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{MergewardError, Result};
use crate::extract::ReferenceExtractor;
use crate::model::{RepoArea, RunCategory, TicketId};
use crate::policy::TargetBranches;
use crate::reconcile::ReconcileSettings;
use crate::retry::RetryPolicy;

pub const COMMON_FILE: &str = "common.json";

pub const ENV_TRACKER_TOKEN: &str = "MERGEWARD_TRACKER_TOKEN";
pub const ENV_GITLAB_TOKEN: &str = "MERGEWARD_GITLAB_TOKEN";
pub const ENV_SHEETS_TOKEN: &str = "MERGEWARD_SHEETS_TOKEN";

/// Merge retry bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_secs() -> u64 {
    5
}

impl Default for MergeRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl MergeRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

/// Release spreadsheet location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetConfig {
    pub sheet_key: String,
    /// Worksheet holding ticket status rows.
    pub worksheet: String,
    /// Worksheet holding original tickets that need code moves.
    #[serde(default)]
    pub code_move_worksheet: Option<String>,
    /// Value written to the dev status column when a cross-reference lands.
    #[serde(default = "default_dev_status_done")]
    pub dev_status_done: String,
}

fn default_dev_status_done() -> String {
    "Done".to_string()
}

/// Fully resolved configuration for one run category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub tracker_url: String,
    pub gitlab_url: String,
    #[serde(default)]
    pub filter_ids: Vec<u64>,
    #[serde(default)]
    pub review_awaited_tag: Option<u64>,
    #[serde(default)]
    pub target_branches: TargetBranches,
    /// Host project id per repository area.
    #[serde(default)]
    pub projects: BTreeMap<RepoArea, u64>,
    #[serde(default)]
    pub excluded_url_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub mark_fixed: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub merge_retry: MergeRetryConfig,
    #[serde(default)]
    pub sheet: Option<SheetConfig>,
    /// Delay between sheet-status rows.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default)]
    pub control_ticket: Option<TicketId>,
}

fn default_true() -> bool {
    true
}

fn default_pacing_ms() -> u64 {
    1000
}

impl CategoryConfig {
    /// Load `category` from `dir`. A missing common file is an error; a
    /// missing category file just leaves the common values in place.
    pub fn load(dir: &Path, category: &RunCategory) -> Result<Self> {
        let mut merged = builtin_defaults(category);

        let common = dir.join(COMMON_FILE);
        merge_layer(&mut merged, read_object(&common)?);

        let own = dir.join(format!("{category}.json"));
        if own.exists() {
            merge_layer(&mut merged, read_object(&own)?);
        } else {
            debug!(category = %category, path = %own.display(), "no category config file");
        }

        serde_json::from_value(Value::Object(merged))
            .map_err(|e| MergewardError::Config(format!("{category}: {e}")))
    }

    /// Load every category in `categories`.
    pub fn load_all<'a, I>(dir: &Path, categories: I) -> Result<BTreeMap<RunCategory, Self>>
    where
        I: IntoIterator<Item = &'a RunCategory>,
    {
        categories
            .into_iter()
            .map(|c| Ok((c.clone(), Self::load(dir, c)?)))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.merge_retry.policy()
    }

    pub fn extractor(&self) -> ReferenceExtractor {
        ReferenceExtractor::new(&self.gitlab_url)
            .with_exclusions(self.excluded_url_patterns.iter().cloned())
    }

    pub fn reconcile_settings(&self, category: &RunCategory) -> ReconcileSettings {
        ReconcileSettings {
            category: category.clone(),
            review_awaited_tag: self.review_awaited_tag,
            target_branches: self.target_branches.clone(),
            mark_fixed: self.mark_fixed,
            extractor: self.extractor(),
        }
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

fn builtin_defaults(category: &RunCategory) -> Map<String, Value> {
    let mut m = Map::new();
    if category.as_str() == RunCategory::PRODUCTION_SUPPORT {
        m.insert("mark_fixed".into(), Value::Bool(false));
    }
    m
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MergewardError::Config(format!("read {}: {e}", path.display())))?;
    match serde_json::from_str(&text)
        .map_err(|e| MergewardError::Config(format!("parse {}: {e}", path.display())))?
    {
        Value::Object(map) => Ok(map),
        _ => Err(MergewardError::Config(format!(
            "{} must hold a JSON object",
            path.display()
        ))),
    }
}

fn merge_layer(base: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (k, v) in layer {
        base.insert(k, v);
    }
}

/// Credentials, read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub tracker_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub sheets_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| if s.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("tracker_token", &mask(&self.tracker_token))
            .field("gitlab_token", &mask(&self.gitlab_token))
            .field("sheets_token", &mask(&self.sheets_token))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            tracker_token: var(ENV_TRACKER_TOKEN),
            gitlab_token: var(ENV_GITLAB_TOKEN),
            sheets_token: var(ENV_SHEETS_TOKEN),
        }
    }

    /// The named token, or a configuration error naming its variable.
    pub fn require<'a>(token: &'a Option<String>, var: &str) -> Result<&'a str> {
        token
            .as_deref()
            .ok_or_else(|| MergewardError::Config(format!("{var} is not set")))
    }
}
