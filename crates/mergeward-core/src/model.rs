//! Transient views of tracker tickets and source-control change requests.
//!
//! Both are fetched fresh per run (tickets) or per ticket (change requests)
//! and never written back locally; every mutation goes through a collaborator.

use serde::{Deserialize, Serialize};

/// Tracker ticket identifier.
pub type TicketId = u64;

/// Tracker resolution that marks a ticket as done.
pub const RESOLUTION_FIXED: &str = "Fixed";

/// Resolution a developer sets when a code move turns out to be unnecessary.
pub const RESOLUTION_FOR_SUBMITTER: &str = "For Submitter";

/// Record type value identifying a code-move ticket.
pub const RECORD_TYPE_CODE_MOVE: &str = "Code Move";

/// Named run lane: each category has its own configuration, progress slot
/// and summary channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunCategory(String);

impl RunCategory {
    pub const REGRESSION: &'static str = "regression";
    pub const PRODUCTION_SUPPORT: &'static str = "production_support";
    pub const SHEET_STATUS: &'static str = "sheet_status";
    pub const CODE_MOVE: &'static str = "code_move";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Every lane the process knows about at start-up.
    pub fn known() -> Vec<RunCategory> {
        [
            Self::REGRESSION,
            Self::PRODUCTION_SUPPORT,
            Self::SHEET_STATUS,
            Self::CODE_MOVE,
        ]
        .into_iter()
        .map(RunCategory::new)
        .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Title-cased name used in chat summaries ("production_support" ->
    /// "Production_support").
    pub fn display_title(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl std::fmt::Display for RunCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a ticket is an ordinary fix or a cloned code-move ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    #[default]
    Regular,
    CodeMove,
}

impl TicketKind {
    /// Derive the kind from the tracker's "Record Type" field.
    pub fn from_record_type(record_type: &str) -> Self {
        if record_type.trim() == RECORD_TYPE_CODE_MOVE {
            TicketKind::CodeMove
        } else {
            TicketKind::Regular
        }
    }
}

/// Read-mostly view of a tracker ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub kind: TicketKind,
    pub summary: String,
    pub description: String,
    /// Note bodies in tracker order.
    pub notes: Vec<String>,
    /// Current resolution label.
    pub resolution: String,
    /// Attached tag identifiers.
    pub tags: Vec<u64>,
    /// Ticket this one was cloned from (code-move tickets).
    pub original_ticket: Option<TicketId>,
}

impl Ticket {
    pub fn new(id: TicketId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: TicketKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_note(mut self, text: impl Into<String>) -> Self {
        self.notes.push(text.into());
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_original(mut self, original: TicketId) -> Self {
        self.original_ticket = Some(original);
        self
    }

    pub fn is_code_move(&self) -> bool {
        self.kind == TicketKind::CodeMove
    }
}

/// Lifecycle state of a change request on the source-control host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Open,
    Merged,
    Closed,
}

impl RequestState {
    /// Map a host state string. `locked` is a transient state during a merge
    /// and still counts as open.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "opened" | "open" | "locked" => Some(RequestState::Open),
            "merged" => Some(RequestState::Merged),
            "closed" => Some(RequestState::Closed),
            _ => None,
        }
    }
}

/// A change request as reported by the source-control host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub url: String,
    /// Project-local request number, the last path segment of the URL.
    pub iid: u64,
    pub state: RequestState,
    pub target_branch: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub author: Option<String>,
}

impl ChangeRequest {
    pub fn new(url: impl Into<String>, state: RequestState, target_branch: &str) -> Self {
        let url = url.into();
        let iid = request_number(&url).unwrap_or_default();
        Self {
            url,
            iid,
            state,
            target_branch: target_branch.to_string(),
            labels: Vec::new(),
            assignee: None,
            author: None,
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_assignee(mut self, name: &str) -> Self {
        self.assignee = Some(name.to_string());
        self
    }

    pub fn with_author(mut self, name: &str) -> Self {
        self.author = Some(name.to_string());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn has_any_label(&self, labels: &[&str]) -> bool {
        labels.iter().any(|l| self.has_label(l))
    }
}

/// Parse the request number from the last path segment of a request URL.
pub fn request_number(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Platform area a repository belongs to; each area has its own expected
/// target branch and host project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RepoArea {
    BackOffice,
    Connect04,
    Connect03,
    MobileApp,
}

impl RepoArea {
    pub const ALL: [RepoArea; 4] = [
        RepoArea::BackOffice,
        RepoArea::Connect04,
        RepoArea::Connect03,
        RepoArea::MobileApp,
    ];

    /// Repository-name substring that identifies the area in a request URL.
    pub fn slug(self) -> &'static str {
        match self {
            RepoArea::BackOffice => "NS61x",
            RepoArea::Connect04 => "NSConnect40",
            RepoArea::Connect03 => "nscp30",
            RepoArea::MobileApp => "ClubNow",
        }
    }

    /// Resolve the area from a request URL. First match wins.
    pub fn from_url(url: &str) -> Option<RepoArea> {
        Self::ALL.into_iter().find(|area| url.contains(area.slug()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_number_is_last_segment() {
        assert_eq!(
            request_number("http://git.example.com:7070/team/NS61x/merge_requests/42"),
            Some(42)
        );
        assert_eq!(request_number("http://git.example.com/x/merge_requests/"), None);
    }

    #[test]
    fn repo_area_resolves_by_substring() {
        assert_eq!(
            RepoArea::from_url("http://git/team/NSConnect40/merge_requests/1"),
            Some(RepoArea::Connect04)
        );
        assert_eq!(
            RepoArea::from_url("http://git/mobile/ClubNow/merge_requests/9"),
            Some(RepoArea::MobileApp)
        );
        assert_eq!(RepoArea::from_url("http://git/other/merge_requests/9"), None);
    }

    #[test]
    fn state_parse_treats_locked_as_open() {
        assert_eq!(RequestState::parse("opened"), Some(RequestState::Open));
        assert_eq!(RequestState::parse("locked"), Some(RequestState::Open));
        assert_eq!(RequestState::parse("merged"), Some(RequestState::Merged));
        assert_eq!(RequestState::parse("closed"), Some(RequestState::Closed));
        assert_eq!(RequestState::parse("draft"), None);
    }

    #[test]
    fn ticket_kind_from_record_type() {
        assert_eq!(TicketKind::from_record_type("Code Move"), TicketKind::CodeMove);
        assert_eq!(TicketKind::from_record_type("Bug"), TicketKind::Regular);
        assert_eq!(TicketKind::from_record_type(""), TicketKind::Regular);
    }

    #[test]
    fn category_display_title() {
        assert_eq!(RunCategory::new("regression").display_title(), "Regression");
        assert_eq!(RunCategory::new("").display_title(), "");
    }
}
