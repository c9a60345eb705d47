//! Run progress tracking and single-run-per-category admission.
//!
//! One `watch` channel per category holds that category's [`RunProgress`].
//! Only the run that was admitted holds a [`ProgressHandle`] and writes to
//! the channel; status pollers read snapshots without blocking it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{MergewardError, Result};
use crate::model::RunCategory;

/// Highest percentage a run reports before it completes.
pub const RUNNING_CEILING: u8 = 99;

/// Lifecycle state of a category's latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Error(String),
}

/// Status and percentage of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub status: RunStatus,
    pub percentage: u8,
}

impl RunProgress {
    pub fn idle() -> Self {
        Self {
            status: RunStatus::Idle,
            percentage: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Per-category progress slots, fixed at construction.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    slots: Arc<HashMap<RunCategory, Arc<watch::Sender<RunProgress>>>>,
}

impl ProgressTracker {
    /// Create an idle slot for every category.
    pub fn new<I: IntoIterator<Item = RunCategory>>(categories: I) -> Self {
        let slots = categories
            .into_iter()
            .map(|c| {
                let (tx, _rx) = watch::channel(RunProgress::idle());
                (c, Arc::new(tx))
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &RunCategory> {
        self.slots.keys()
    }

    /// Admit a run for `category`, or fail with `Busy` if one is running.
    pub fn start(&self, category: &RunCategory) -> Result<ProgressHandle> {
        let slot = self.slot(category)?;
        let admitted = slot.send_if_modified(|p| {
            if p.is_running() {
                return false;
            }
            *p = RunProgress {
                status: RunStatus::Running,
                percentage: 0,
            };
            true
        });
        if !admitted {
            return Err(MergewardError::Busy {
                category: category.clone(),
            });
        }
        Ok(ProgressHandle {
            category: category.clone(),
            slot: slot.clone(),
            finished: false,
        })
    }

    /// Latest known progress for `category`.
    pub fn snapshot(&self, category: &RunCategory) -> Result<RunProgress> {
        Ok(self.slot(category)?.borrow().clone())
    }

    /// Receiver that observes every progress change for `category`.
    pub fn subscribe(&self, category: &RunCategory) -> Result<watch::Receiver<RunProgress>> {
        Ok(self.slot(category)?.subscribe())
    }

    fn slot(&self, category: &RunCategory) -> Result<&Arc<watch::Sender<RunProgress>>> {
        self.slots
            .get(category)
            .ok_or_else(|| MergewardError::UnknownCategory(category.clone()))
    }
}

/// Write access to one admitted run's progress.
///
/// Dropping the handle before [`complete`](Self::complete) or
/// [`fail`](Self::fail) marks the run as aborted so the category can be
/// started again.
#[derive(Debug)]
pub struct ProgressHandle {
    category: RunCategory,
    slot: Arc<watch::Sender<RunProgress>>,
    finished: bool,
}

impl ProgressHandle {
    pub fn category(&self) -> &RunCategory {
        &self.category
    }

    /// Raise the percentage. Lower values are ignored and the value is
    /// capped below 100 until the run completes.
    pub fn advance(&self, percentage: u8) {
        let pct = percentage.min(RUNNING_CEILING);
        self.slot.send_if_modified(|p| {
            if p.is_running() && pct > p.percentage {
                p.percentage = pct;
                true
            } else {
                false
            }
        });
    }

    pub fn percentage(&self) -> u8 {
        self.slot.borrow().percentage
    }

    /// Finish the run successfully at 100%.
    pub fn complete(mut self) {
        self.finished = true;
        self.slot.send_modify(|p| {
            *p = RunProgress {
                status: RunStatus::Completed,
                percentage: 100,
            }
        });
    }

    /// Finish the run with an error; the percentage resets to 0.
    pub fn fail(mut self, message: impl Into<String>) {
        self.finished = true;
        let message = message.into();
        self.slot.send_modify(|p| {
            *p = RunProgress {
                status: RunStatus::Error(message),
                percentage: 0,
            }
        });
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.send_if_modified(|p| {
                if !p.is_running() {
                    return false;
                }
                *p = RunProgress {
                    status: RunStatus::Error("run aborted".to_string()),
                    percentage: 0,
                };
                true
            });
        }
    }
}

/// Percentage after finishing ticket `done` (0-based) of `total`, rounded
/// half up.
pub fn ticket_percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (200 * (done + 1) + total) / (2 * total);
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (ProgressTracker, RunCategory) {
        let cat = RunCategory::new(RunCategory::REGRESSION);
        (ProgressTracker::new(RunCategory::known()), cat)
    }

    #[test]
    fn slots_start_idle() {
        let (t, cat) = tracker();
        assert_eq!(t.snapshot(&cat).unwrap(), RunProgress::idle());
        assert_eq!(t.categories().count(), 4);
    }

    #[test]
    fn second_start_is_busy_until_finished() {
        let (t, cat) = tracker();
        let handle = t.start(&cat).unwrap();
        assert!(matches!(t.start(&cat), Err(MergewardError::Busy { .. })));

        // other categories are independent
        let other = RunCategory::new(RunCategory::PRODUCTION_SUPPORT);
        let other_handle = t.start(&other).unwrap();
        other_handle.fail("boom");

        handle.complete();
        assert_eq!(t.snapshot(&cat).unwrap().status, RunStatus::Completed);
        assert!(t.start(&cat).is_ok());
    }

    #[test]
    fn restart_after_error_is_admitted() {
        let (t, cat) = tracker();
        t.start(&cat).unwrap().fail("tracker down");
        let p = t.snapshot(&cat).unwrap();
        assert_eq!(p.status, RunStatus::Error("tracker down".into()));
        assert_eq!(p.percentage, 0);
        assert!(t.start(&cat).is_ok());
    }

    #[test]
    fn unknown_category_is_rejected() {
        let (t, _) = tracker();
        let err = t.start(&RunCategory::new("nightly")).unwrap_err();
        assert!(matches!(err, MergewardError::UnknownCategory(_)));
        assert!(t.snapshot(&RunCategory::new("nightly")).is_err());
    }

    #[test]
    fn percentage_is_monotonic_and_capped() {
        let (t, cat) = tracker();
        let h = t.start(&cat).unwrap();
        h.advance(40);
        h.advance(20);
        assert_eq!(t.snapshot(&cat).unwrap().percentage, 40);
        h.advance(100);
        let p = t.snapshot(&cat).unwrap();
        assert_eq!(p.percentage, RUNNING_CEILING);
        assert_eq!(p.status, RunStatus::Running);
        h.complete();
        assert_eq!(t.snapshot(&cat).unwrap().percentage, 100);
    }

    #[test]
    fn dropped_handle_marks_run_aborted() {
        let (t, cat) = tracker();
        drop(t.start(&cat).unwrap());
        assert_eq!(
            t.snapshot(&cat).unwrap().status,
            RunStatus::Error("run aborted".into())
        );
        assert!(t.start(&cat).is_ok());
    }

    #[test]
    fn subscribers_see_updates() {
        let (t, cat) = tracker();
        let rx = t.subscribe(&cat).unwrap();
        let h = t.start(&cat).unwrap();
        h.advance(33);
        assert_eq!(rx.borrow().percentage, 33);
    }

    #[test]
    fn ticket_percentage_rounds() {
        assert_eq!(ticket_percentage(0, 3), 33);
        assert_eq!(ticket_percentage(1, 3), 67);
        assert_eq!(ticket_percentage(2, 3), 100);
        assert_eq!(ticket_percentage(0, 8), 13);
        assert_eq!(ticket_percentage(0, 0), 100);
    }
}
