//! In-memory fakes for the collaborator traits.
//!
//! Each fake keeps its state behind a `Mutex`, applies mutations to that
//! state, and records them so tests can assert on exactly what was issued.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collab::{
    MergeReceipt, NewTicket, Notifier, SheetRow, SheetSync, SourceControl, StatusColumns,
    TicketTracker,
};
use crate::error::{MergewardError, Result};
use crate::model::{ChangeRequest, RequestState, Ticket, TicketId, TicketKind};

// ---------------------------------------------------------------------------
// FakeTracker
// ---------------------------------------------------------------------------

/// A mutation issued against the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    SetResolution { id: TicketId, resolution: String },
    AddNote { id: TicketId, text: String },
    AddTags { id: TicketId, tags: Vec<u64> },
    RemoveTags { id: TicketId, tags: Vec<u64> },
    Close { id: TicketId },
    Create { id: TicketId, summary: String },
    Relate { id: TicketId, other: TicketId },
    Unrelate { id: TicketId, other: TicketId },
}

impl TrackerCall {
    pub fn ticket(&self) -> TicketId {
        match self {
            TrackerCall::SetResolution { id, .. }
            | TrackerCall::AddNote { id, .. }
            | TrackerCall::AddTags { id, .. }
            | TrackerCall::RemoveTags { id, .. }
            | TrackerCall::Close { id }
            | TrackerCall::Create { id, .. }
            | TrackerCall::Relate { id, .. }
            | TrackerCall::Unrelate { id, .. } => *id,
        }
    }
}

/// Tracker backed by a `BTreeMap<id, Ticket>`.
#[derive(Debug)]
pub struct FakeTracker {
    base_url: String,
    tickets: Mutex<BTreeMap<TicketId, Ticket>>,
    filters: Mutex<HashMap<u64, Vec<TicketId>>>,
    closed: Mutex<HashSet<TicketId>>,
    relations: Mutex<HashSet<(TicketId, TicketId)>>,
    calls: Mutex<Vec<TrackerCall>>,
    failing_fetches: Mutex<HashSet<TicketId>>,
    fail_creates: AtomicBool,
    next_id: AtomicU64,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self::new("http://tracker.test")
    }
}

impl FakeTracker {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tickets: Mutex::default(),
            filters: Mutex::default(),
            closed: Mutex::default(),
            relations: Mutex::default(),
            calls: Mutex::default(),
            failing_fetches: Mutex::default(),
            fail_creates: AtomicBool::new(false),
            next_id: AtomicU64::new(90_000),
        }
    }

    pub fn insert(&self, ticket: Ticket) {
        self.tickets.lock().unwrap().insert(ticket.id, ticket);
    }

    /// Make `filter_id` return `ids`, in that order.
    pub fn set_filter(&self, filter_id: u64, ids: &[TicketId]) {
        self.filters.lock().unwrap().insert(filter_id, ids.to_vec());
    }

    /// Make `fetch_by_id(id)` fail.
    pub fn fail_fetch(&self, id: TicketId) {
        self.failing_fetches.lock().unwrap().insert(id);
    }

    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: TicketId) -> Option<Ticket> {
        self.tickets.lock().unwrap().get(&id).cloned()
    }

    pub fn is_closed(&self, id: TicketId) -> bool {
        self.closed.lock().unwrap().contains(&id)
    }

    pub fn is_related(&self, a: TicketId, b: TicketId) -> bool {
        let rel = self.relations.lock().unwrap();
        rel.contains(&(a, b)) || rel.contains(&(b, a))
    }

    /// Every mutation issued so far, in order.
    pub fn mutations(&self) -> Vec<TrackerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations_for(&self, id: TicketId) -> Vec<TrackerCall> {
        self.mutations()
            .into_iter()
            .filter(|c| c.ticket() == id)
            .collect()
    }

    fn record(&self, call: TrackerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn with_ticket<F: FnOnce(&mut Ticket)>(&self, id: TicketId, f: F) -> Result<()> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets
            .get_mut(&id)
            .ok_or_else(|| MergewardError::Tracker(format!("issue {id} not found")))?;
        f(ticket);
        Ok(())
    }
}

#[async_trait]
impl TicketTracker for FakeTracker {
    async fn fetch_by_filter(&self, filter_ids: &[u64]) -> Result<Vec<Ticket>> {
        let filters = self.filters.lock().unwrap();
        let tickets = self.tickets.lock().unwrap();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for filter_id in filter_ids {
            for id in filters.get(filter_id).into_iter().flatten() {
                if let Some(t) = tickets.get(id) {
                    if seen.insert(*id) {
                        out.push(t.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn fetch_by_id(&self, id: TicketId) -> Result<Option<Ticket>> {
        if self.failing_fetches.lock().unwrap().contains(&id) {
            return Err(MergewardError::Tracker(format!("fetch of {id} failed")));
        }
        Ok(self.get(id))
    }

    async fn set_resolution(&self, id: TicketId, resolution: &str) -> Result<()> {
        self.with_ticket(id, |t| t.resolution = resolution.to_string())?;
        self.record(TrackerCall::SetResolution {
            id,
            resolution: resolution.to_string(),
        });
        Ok(())
    }

    async fn add_note(&self, id: TicketId, text: &str) -> Result<()> {
        self.with_ticket(id, |t| t.notes.push(text.to_string()))?;
        self.record(TrackerCall::AddNote {
            id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn add_tags(&self, id: TicketId, tags: &[u64]) -> Result<()> {
        self.with_ticket(id, |t| {
            for tag in tags {
                if !t.tags.contains(tag) {
                    t.tags.push(*tag);
                }
            }
        })?;
        self.record(TrackerCall::AddTags {
            id,
            tags: tags.to_vec(),
        });
        Ok(())
    }

    async fn remove_tags(&self, id: TicketId, tags: &[u64]) -> Result<()> {
        self.with_ticket(id, |t| t.tags.retain(|x| !tags.contains(x)))?;
        self.record(TrackerCall::RemoveTags {
            id,
            tags: tags.to_vec(),
        });
        Ok(())
    }

    async fn close(&self, id: TicketId) -> Result<()> {
        self.with_ticket(id, |_| {})?;
        self.closed.lock().unwrap().insert(id);
        self.record(TrackerCall::Close { id });
        Ok(())
    }

    async fn create_ticket(&self, new: &NewTicket) -> Result<TicketId> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(MergewardError::Tracker("create rejected".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ticket = Ticket {
            id,
            kind: TicketKind::from_record_type(&new.record_type),
            summary: new.summary.clone(),
            description: new.description.clone(),
            original_ticket: crate::extract::original_ticket_ref(&new.description),
            ..Ticket::default()
        };
        self.insert(ticket);
        self.record(TrackerCall::Create {
            id,
            summary: new.summary.clone(),
        });
        Ok(id)
    }

    async fn relate(&self, id: TicketId, other: TicketId) -> Result<()> {
        self.relations.lock().unwrap().insert((id, other));
        self.record(TrackerCall::Relate { id, other });
        Ok(())
    }

    async fn unrelate(&self, id: TicketId, other: TicketId) -> Result<()> {
        let mut rel = self.relations.lock().unwrap();
        rel.remove(&(id, other));
        rel.remove(&(other, id));
        drop(rel);
        self.record(TrackerCall::Unrelate { id, other });
        Ok(())
    }

    fn public_url(&self, id: TicketId) -> String {
        format!("{}/view.php?id={id}", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// FakeSourceControl
// ---------------------------------------------------------------------------

/// Scripted response to one merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBehavior {
    /// Merge and report merged.
    Succeed,
    /// Reject the call with an error.
    Fail,
    /// Accept the call but leave the request open.
    AcceptWithoutMerging,
    /// Report not merged while someone else merged it concurrently.
    MergedElsewhere,
    /// Someone else merged it first, so the host rejects the call.
    RejectedAfterConcurrentMerge,
}

/// Source-control host backed by a `HashMap<url, ChangeRequest>`.
///
/// Merge calls consume the URL's script front to back; an empty script
/// succeeds.
#[derive(Debug, Default)]
pub struct FakeSourceControl {
    requests: Mutex<HashMap<String, ChangeRequest>>,
    scripts: Mutex<HashMap<String, VecDeque<MergeBehavior>>>,
    merge_calls: Mutex<HashMap<String, u32>>,
    fetch_calls: Mutex<HashMap<String, u32>>,
    failing_fetches: Mutex<HashSet<String>>,
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: ChangeRequest) {
        self.requests
            .lock()
            .unwrap()
            .insert(request.url.clone(), request);
    }

    pub fn get(&self, url: &str) -> Option<ChangeRequest> {
        self.requests.lock().unwrap().get(url).cloned()
    }

    pub fn script<I: IntoIterator<Item = MergeBehavior>>(&self, url: &str, behaviors: I) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), behaviors.into_iter().collect());
    }

    pub fn fail_fetch(&self, url: &str) {
        self.failing_fetches.lock().unwrap().insert(url.to_string());
    }

    pub fn merge_calls(&self, url: &str) -> u32 {
        self.merge_calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_merge_calls(&self) -> u32 {
        self.merge_calls.lock().unwrap().values().sum()
    }

    pub fn fetch_calls(&self, url: &str) -> u32 {
        self.fetch_calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn set_state(&self, url: &str, state: RequestState) {
        if let Some(cr) = self.requests.lock().unwrap().get_mut(url) {
            cr.state = state;
        }
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn fetch_change_request(&self, url: &str) -> Result<Option<ChangeRequest>> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        if self.failing_fetches.lock().unwrap().contains(url) {
            return Err(MergewardError::SourceControl(format!("fetch of {url} failed")));
        }
        Ok(self.get(url))
    }

    async fn merge(&self, url: &str) -> Result<MergeReceipt> {
        *self
            .merge_calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        if self.get(url).is_none() {
            return Err(MergewardError::SourceControl(format!("{url} not found")));
        }
        let behavior = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MergeBehavior::Succeed);
        match behavior {
            MergeBehavior::Succeed => {
                self.set_state(url, RequestState::Merged);
                Ok(MergeReceipt::merged())
            }
            MergeBehavior::Fail => Err(MergewardError::SourceControl(
                "merge rejected with status 405".into(),
            )),
            MergeBehavior::AcceptWithoutMerging => Ok(MergeReceipt {
                state: Some(RequestState::Open),
            }),
            MergeBehavior::MergedElsewhere => {
                self.set_state(url, RequestState::Merged);
                Ok(MergeReceipt { state: None })
            }
            MergeBehavior::RejectedAfterConcurrentMerge => {
                self.set_state(url, RequestState::Merged);
                Err(MergewardError::SourceControl(
                    "merge rejected with status 405".into(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeSheets
// ---------------------------------------------------------------------------

/// Spreadsheet holding one status worksheet and a cross-reference log.
#[derive(Debug, Default)]
pub struct FakeSheets {
    rows: Mutex<Vec<SheetRow>>,
    cross_references: Mutex<Vec<(TicketId, String)>>,
    annotations: Mutex<Vec<(TicketId, String)>>,
    status_updates: Mutex<Vec<(u32, StatusColumns)>>,
    failing_rows: Mutex<HashSet<u32>>,
}

impl FakeSheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the ticket column from row 2 down.
    pub fn with_tickets(self, tickets: &[&str]) -> Self {
        *self.rows.lock().unwrap() = tickets
            .iter()
            .enumerate()
            .map(|(i, t)| SheetRow {
                row: i as u32 + 2,
                ticket: t.to_string(),
            })
            .collect();
        self
    }

    /// Make updates to `row` fail.
    pub fn fail_row(&self, row: u32) {
        self.failing_rows.lock().unwrap().insert(row);
    }

    pub fn cross_references(&self) -> Vec<(TicketId, String)> {
        self.cross_references.lock().unwrap().clone()
    }

    pub fn annotations(&self) -> Vec<(TicketId, String)> {
        self.annotations.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<(u32, StatusColumns)> {
        self.status_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetSync for FakeSheets {
    async fn propagate_cross_reference(&self, original: TicketId, formula: &str) -> Result<()> {
        self.cross_references
            .lock()
            .unwrap()
            .push((original, formula.to_string()));
        Ok(())
    }

    async fn annotate_ticket_row(&self, original: TicketId, formula: &str) -> Result<()> {
        self.annotations
            .lock()
            .unwrap()
            .push((original, formula.to_string()));
        Ok(())
    }

    async fn read_ticket_rows(&self) -> Result<Vec<SheetRow>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn update_status_columns(&self, row: u32, status: StatusColumns) -> Result<()> {
        if self.failing_rows.lock().unwrap().contains(&row) {
            return Err(MergewardError::Sheet(format!("row {row} is protected")));
        }
        self.status_updates.lock().unwrap().push((row, status));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeNotifier
// ---------------------------------------------------------------------------

/// Notifier that keeps posted messages.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    posts: Mutex<Vec<String>>,
    reject: AtomicBool,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every post with a non-success status.
    pub fn rejecting() -> Self {
        let n = Self::default();
        n.reject.store(true, Ordering::SeqCst);
        n
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn post(&self, text: &str) -> Result<()> {
        self.posts.lock().unwrap().push(text.to_string());
        if self.reject.load(Ordering::SeqCst) {
            return Err(MergewardError::Notifier("webhook answered 500".into()));
        }
        Ok(())
    }
}
