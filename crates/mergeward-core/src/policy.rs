//! Eligibility policy.
//!
//! Classifies a change request against the owning ticket's kind and the
//! expected target branch for its repository area. The checks run in a fixed
//! precedence order: closed state, branch, then labels. The function is pure
//! so every rule can be tested without a network.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MergewardError, Result};
use crate::model::{ChangeRequest, RepoArea, RequestState, TicketKind};

pub const LABEL_QA_VERIFIED: &str = "QA Verified";
pub const LABEL_QA_ACCEPTED: &str = "QA Accepted";
pub const LABEL_CODE_REVIEWED: &str = "Code Reviewed";
pub const LABEL_REVIEWED: &str = "Reviewed";
pub const LABEL_UNIT_TESTED: &str = "Unit Tested";

/// Labels that count as QA sign-off.
pub const QA_LABELS: [&str; 2] = [LABEL_QA_VERIFIED, LABEL_QA_ACCEPTED];
/// Labels that count as review sign-off.
pub const REVIEW_LABELS: [&str; 2] = [LABEL_CODE_REVIEWED, LABEL_REVIEWED];
/// Labels that let a code-move request through.
pub const CODE_MOVE_LABELS: [&str; 2] = [LABEL_UNIT_TESTED, LABEL_QA_VERIFIED];

/// Outcome of evaluating one change request for one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityVerdict {
    Eligible,
    BranchMismatch,
    PendingQa,
    PendingReview,
    NotCodeMoveTested,
    /// The request cannot be evaluated (it is closed).
    Ineligible,
}

/// A verdict plus the human-readable reason logged for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: EligibilityVerdict,
    pub reason: String,
}

impl Evaluation {
    fn new(verdict: EligibilityVerdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.verdict == EligibilityVerdict::Eligible
    }
}

/// Expected target branch per repository area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetBranches(BTreeMap<RepoArea, String>);

impl TargetBranches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, area: RepoArea, branch: impl Into<String>) -> Self {
        self.0.insert(area, branch.into());
        self
    }

    pub fn get(&self, area: RepoArea) -> Option<&str> {
        self.0.get(&area).map(String::as_str)
    }

    /// Branch a request at `url` must target. An unrecognised repository, or
    /// a recognised one with no configured branch, is a mapping error.
    pub fn expected_for(&self, url: &str) -> Result<&str> {
        RepoArea::from_url(url)
            .and_then(|area| self.get(area))
            .ok_or_else(|| MergewardError::MissingMapping {
                url: url.to_string(),
            })
    }
}

/// Evaluate `request` for a ticket of `kind` whose platform expects
/// `expected_branch`.
pub fn evaluate(request: &ChangeRequest, kind: TicketKind, expected_branch: &str) -> Evaluation {
    if request.state == RequestState::Closed {
        return Evaluation::new(EligibilityVerdict::Ineligible, "MR is closed");
    }

    if request.target_branch != expected_branch {
        let author = request.author.as_deref().unwrap_or("Unknown");
        return Evaluation::new(
            EligibilityVerdict::BranchMismatch,
            format!(
                "Invalid target branch in the MR, it should be {expected_branch}, Author: {author}"
            ),
        );
    }

    if kind == TicketKind::CodeMove {
        return if request.has_any_label(&CODE_MOVE_LABELS) {
            Evaluation::new(EligibilityVerdict::Eligible, "Code move tested")
        } else {
            Evaluation::new(EligibilityVerdict::NotCodeMoveTested, "Code move not unit tested")
        };
    }

    if !request.has_any_label(&QA_LABELS) {
        return Evaluation::new(
            EligibilityVerdict::PendingQa,
            "QA Verified label missing in the MR, skipping it",
        );
    }

    if !request.has_any_label(&REVIEW_LABELS) {
        return Evaluation::new(
            EligibilityVerdict::PendingReview,
            format!("Code Review pending at {}", reviewer_of(request)),
        );
    }

    Evaluation::new(EligibilityVerdict::Eligible, "QA verified and reviewed")
}

/// Name a pending review is waiting on: the assignee, if any.
pub fn reviewer_of(request: &ChangeRequest) -> &str {
    request.assignee.as_deref().unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://git.example.com/team/NS61x/merge_requests/5";

    fn open(branch: &str, labels: &[&str]) -> ChangeRequest {
        ChangeRequest::new(URL, RequestState::Open, branch).with_labels(labels)
    }

    #[test]
    fn branch_mismatch_dominates_labels() {
        let cr = open("develop", &[LABEL_QA_VERIFIED, LABEL_REVIEWED, LABEL_UNIT_TESTED])
            .with_author("dana");
        for kind in [TicketKind::Regular, TicketKind::CodeMove] {
            let eval = evaluate(&cr, kind, "release/6.1");
            assert_eq!(eval.verdict, EligibilityVerdict::BranchMismatch);
            assert!(eval.reason.contains("it should be release/6.1"));
            assert!(eval.reason.contains("Author: dana"));
        }
    }

    #[test]
    fn regular_ticket_needs_both_labels() {
        let both = open("main", &[LABEL_QA_ACCEPTED, LABEL_CODE_REVIEWED]);
        assert!(evaluate(&both, TicketKind::Regular, "main").is_eligible());

        let qa_only = open("main", &[LABEL_QA_VERIFIED]).with_assignee("rory");
        let eval = evaluate(&qa_only, TicketKind::Regular, "main");
        assert_eq!(eval.verdict, EligibilityVerdict::PendingReview);
        assert_eq!(eval.reason, "Code Review pending at rory");

        let review_only = open("main", &[LABEL_REVIEWED]);
        assert_eq!(
            evaluate(&review_only, TicketKind::Regular, "main").verdict,
            EligibilityVerdict::PendingQa
        );

        let none = open("main", &[]);
        assert_eq!(
            evaluate(&none, TicketKind::Regular, "main").verdict,
            EligibilityVerdict::PendingQa
        );
    }

    #[test]
    fn code_move_accepts_unit_tested_or_qa_verified() {
        for labels in [[LABEL_UNIT_TESTED].as_slice(), [LABEL_QA_VERIFIED].as_slice()] {
            let cr = open("main", labels);
            assert!(evaluate(&cr, TicketKind::CodeMove, "main").is_eligible());
        }
        let cr = open("main", &[LABEL_REVIEWED, LABEL_QA_ACCEPTED]);
        assert_eq!(
            evaluate(&cr, TicketKind::CodeMove, "main").verdict,
            EligibilityVerdict::NotCodeMoveTested
        );
    }

    #[test]
    fn closed_request_is_ineligible() {
        let cr = ChangeRequest::new(URL, RequestState::Closed, "main")
            .with_labels(&[LABEL_QA_VERIFIED, LABEL_REVIEWED]);
        assert_eq!(
            evaluate(&cr, TicketKind::Regular, "main").verdict,
            EligibilityVerdict::Ineligible
        );
    }

    #[test]
    fn merged_request_is_still_classified() {
        let cr = ChangeRequest::new(URL, RequestState::Merged, "main")
            .with_labels(&[LABEL_QA_VERIFIED, LABEL_REVIEWED]);
        assert!(evaluate(&cr, TicketKind::Regular, "main").is_eligible());
    }

    #[test]
    fn unknown_reviewer_defaults() {
        let cr = open("main", &[LABEL_QA_VERIFIED]);
        assert_eq!(
            evaluate(&cr, TicketKind::Regular, "main").reason,
            "Code Review pending at Unknown"
        );
    }

    #[test]
    fn expected_branch_lookup() {
        let branches = TargetBranches::new()
            .with(RepoArea::BackOffice, "release/6.1")
            .with(RepoArea::MobileApp, "mobile/main");
        assert_eq!(branches.expected_for(URL).unwrap(), "release/6.1");

        let unknown = "http://git.example.com/team/Widgets/merge_requests/5";
        assert!(matches!(
            branches.expected_for(unknown),
            Err(MergewardError::MissingMapping { .. })
        ));

        // recognised area without a configured branch
        let connect = "http://git.example.com/team/nscp30/merge_requests/5";
        assert!(branches.expected_for(connect).is_err());
    }

    #[test]
    fn target_branches_deserialize_from_area_keys() {
        let branches: TargetBranches =
            serde_json::from_str(r#"{"BackOffice": "rel", "Connect04": "c4"}"#).unwrap();
        assert_eq!(branches.get(RepoArea::BackOffice), Some("rel"));
        assert_eq!(branches.get(RepoArea::Connect04), Some("c4"));
        assert_eq!(branches.get(RepoArea::MobileApp), None);
    }
}
