//! Mantis REST client
//!
//! Talks to `<tracker_url>/api/rest`. The token goes verbatim into the
//! `Authorization` header, as Mantis API tokens expect.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use mergeward_core::collab::{NewTicket, TicketTracker};
use mergeward_core::extract::original_ticket_ref;
use mergeward_core::{Ticket, TicketId, TicketKind};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{check, ClientError, Result};

const SERVICE: &str = "mantis";

/// Page size for filter queries.
const PAGE_LIMIT: usize = 50;

/// Status id new code-move tickets start in.
const CODE_MOVE_STATUS_ID: u64 = 50;

/// Custom field ids written on code-move tickets.
mod field {
    pub const RECORD_TYPE: u64 = 1;
    pub const TARGET_VERSION: u64 = 2;
    pub const QA_OWNER: u64 = 6;
    pub const ER_DATE: u64 = 18;
    pub const TARGET_PATCH: u64 = 38;
    pub const CODE_REVIEW: u64 = 41;

    pub const OVERRIDDEN: [u64; 6] = [
        RECORD_TYPE,
        TARGET_VERSION,
        QA_OWNER,
        ER_DATE,
        TARGET_PATCH,
        CODE_REVIEW,
    ];
}

const RECORD_TYPE_FIELD: &str = "Record Type";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IssueList {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    id: TicketId,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    resolution: Option<Named>,
    #[serde(default)]
    tags: Vec<TagRef>,
    #[serde(default)]
    custom_fields: Vec<CustomField>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Note {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
    #[serde(default)]
    label: Option<String>,
}

impl Named {
    /// Display label, which can differ from the enum name on localized installs.
    fn into_label(self) -> String {
        match self.label {
            Some(label) if !label.is_empty() => label,
            _ => self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CustomField {
    field: FieldRef,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct FieldRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    id: u64,
    issue: IssueRef,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    id: TicketId,
}

#[derive(Debug, Deserialize)]
struct Created {
    issue: IssueRef,
}

impl Issue {
    fn custom_field(&self, name: &str) -> Option<&str> {
        self.custom_fields
            .iter()
            .find(|f| f.field.name == name)
            .map(|f| f.value.as_str())
    }

    fn into_ticket(self) -> Ticket {
        let kind = self
            .custom_field(RECORD_TYPE_FIELD)
            .map(TicketKind::from_record_type)
            .unwrap_or_default();
        let original_ticket = original_ticket_ref(&self.description);
        Ticket {
            id: self.id,
            kind,
            summary: self.summary,
            description: self.description,
            notes: self.notes.into_iter().map(|n| n.text).collect(),
            resolution: self.resolution.map(Named::into_label).unwrap_or_default(),
            tags: self.tags.into_iter().map(|t| t.id).collect(),
            original_ticket,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Mantis tracker client
pub struct MantisClient {
    http: Client,
    base_url: String,
}

impl MantisClient {
    /// Create a client for the tracker at `base_url` using API `token`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(token).map_err(|e| ClientError::Setup(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = crate::http_builder(crate::REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/rest/{path}", self.base_url)
    }

    /// Raw issue JSON, or `None` when the tracker does not know the id.
    async fn issue_json(&self, id: TicketId) -> Result<Option<Value>> {
        let response = self.http.get(self.api(&format!("issues/{id}"))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut body: Value = check(SERVICE, response).await?.json().await?;
        match body.get_mut("issues").and_then(Value::as_array_mut) {
            Some(issues) if !issues.is_empty() => Ok(Some(issues.swap_remove(0))),
            _ => Ok(None),
        }
    }

    async fn issue(&self, id: TicketId) -> Result<Option<Issue>> {
        match self.issue_json(id).await? {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| ClientError::payload(SERVICE, e)),
            None => Ok(None),
        }
    }

    async fn filter_page(&self, filter_id: u64, page: usize) -> Result<Vec<Issue>> {
        let response = self
            .http
            .get(self.api("issues"))
            .query(&[
                ("filter_id", filter_id.to_string()),
                ("page", page.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ])
            .send()
            .await?;
        let list: IssueList = check(SERVICE, response).await?.json().await?;
        Ok(list.issues)
    }

    async fn patch_issue(&self, id: TicketId, payload: Value) -> Result<()> {
        let response = self
            .http
            .patch(self.api(&format!("issues/{id}")))
            .json(&payload)
            .send()
            .await?;
        check(SERVICE, response).await?;
        Ok(())
    }

    async fn post(&self, path: &str, payload: Value) -> Result<()> {
        let response = self.http.post(self.api(path)).json(&payload).send().await?;
        check(SERVICE, response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self.http.delete(self.api(path)).send().await?;
        check(SERVICE, response).await?;
        Ok(())
    }

    async fn create(&self, new: &NewTicket) -> Result<TicketId> {
        let template = self
            .issue_json(new.template)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("issue {}", new.template)))?;
        let payload = clone_payload(&template, new);
        let response = self
            .http
            .post(self.api("issues/"))
            .json(&payload)
            .send()
            .await?;
        let created: Created = check(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::payload(SERVICE, e))?;
        Ok(created.issue.id)
    }

    async fn remove_relationship(&self, id: TicketId, other: TicketId) -> Result<()> {
        let issue = self
            .issue(id)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("issue {id}")))?;
        let Some(rel) = issue.relationships.iter().find(|r| r.issue.id == other) else {
            info!(ticket = id, "No relationship found between {id} and {other}.");
            return Ok(());
        };
        self.delete(&format!("issues/{id}/relationships/{}", rel.id))
            .await?;
        info!(ticket = id, "Successfully removed relationship between {id} and {other}");
        Ok(())
    }
}

#[async_trait]
impl TicketTracker for MantisClient {
    async fn fetch_by_filter(&self, filter_ids: &[u64]) -> mergeward_core::Result<Vec<Ticket>> {
        let mut seen = HashSet::new();
        let mut tickets = Vec::new();
        for filter_id in filter_ids {
            let mut page = 1;
            loop {
                let issues = self
                    .filter_page(*filter_id, page)
                    .await
                    .map_err(ClientError::tracker)?;
                let len = issues.len();
                debug!(filter = filter_id, page, count = len, "fetched filter page");
                tickets.extend(
                    issues
                        .into_iter()
                        .filter(|i| seen.insert(i.id))
                        .map(Issue::into_ticket),
                );
                if len < PAGE_LIMIT {
                    break;
                }
                page += 1;
            }
        }
        Ok(tickets)
    }

    async fn fetch_by_id(&self, id: TicketId) -> mergeward_core::Result<Option<Ticket>> {
        let issue = self.issue(id).await.map_err(ClientError::tracker)?;
        Ok(issue.map(Issue::into_ticket))
    }

    async fn set_resolution(&self, id: TicketId, resolution: &str) -> mergeward_core::Result<()> {
        self.patch_issue(id, json!({ "resolution": { "name": resolution } }))
            .await
            .map_err(ClientError::tracker)
    }

    async fn add_note(&self, id: TicketId, text: &str) -> mergeward_core::Result<()> {
        self.post(&format!("issues/{id}/notes"), json!({ "text": text }))
            .await
            .map_err(ClientError::tracker)
    }

    async fn add_tags(&self, id: TicketId, tags: &[u64]) -> mergeward_core::Result<()> {
        let tags: Vec<Value> = tags.iter().map(|t| json!({ "id": t })).collect();
        self.post(&format!("issues/{id}/tags"), json!({ "tags": tags }))
            .await
            .map_err(ClientError::tracker)
    }

    async fn remove_tags(&self, id: TicketId, tags: &[u64]) -> mergeward_core::Result<()> {
        for tag in tags {
            self.delete(&format!("issues/{id}/tags/{tag}"))
                .await
                .map_err(ClientError::tracker)?;
        }
        Ok(())
    }

    async fn close(&self, id: TicketId) -> mergeward_core::Result<()> {
        self.patch_issue(id, json!({ "status": { "name": "closed" } }))
            .await
            .map_err(ClientError::tracker)
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> mergeward_core::Result<TicketId> {
        self.create(ticket).await.map_err(ClientError::tracker)
    }

    async fn relate(&self, id: TicketId, other: TicketId) -> mergeward_core::Result<()> {
        let payload = json!({
            "issue": { "id": other },
            "type": { "name": "related-to" },
        });
        self.post(&format!("issues/{id}/relationships"), payload)
            .await
            .map_err(ClientError::tracker)
    }

    async fn unrelate(&self, id: TicketId, other: TicketId) -> mergeward_core::Result<()> {
        self.remove_relationship(id, other)
            .await
            .map_err(ClientError::tracker)
    }

    fn public_url(&self, id: TicketId) -> String {
        format!("{}/view.php?id={id}", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Code-move payload
// ---------------------------------------------------------------------------

/// Creation payload for a code-move clone of `template`.
///
/// Project, category and the classification fields are copied from the
/// template; the release fields come from `new`. Template custom fields are
/// carried over unless `new` overrides them.
fn clone_payload(template: &Value, new: &NewTicket) -> Value {
    let id_of = |key: &str| template.get(key).and_then(|v| v.get("id")).cloned();

    let mut custom_fields = vec![
        custom(field::RECORD_TYPE, &new.record_type),
        custom(field::TARGET_VERSION, &new.target_version),
        custom(field::TARGET_PATCH, &new.target_patch),
        custom(field::QA_OWNER, &new.qa_owner),
        custom(field::CODE_REVIEW, "None"),
        custom(field::ER_DATE, &er_timestamp(new.er_date).to_string()),
    ];
    if let Some(existing) = template.get("custom_fields").and_then(Value::as_array) {
        for f in existing {
            let Some(fid) = f.pointer("/field/id").and_then(Value::as_u64) else {
                continue;
            };
            if field::OVERRIDDEN.contains(&fid) {
                continue;
            }
            let value = f.get("value").cloned().unwrap_or(Value::Null);
            custom_fields.push(json!({ "field": { "id": fid }, "value": value }));
        }
    }

    let tags: Vec<Value> = template
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.get("name").cloned())
                .map(|name| json!({ "name": name }))
                .collect()
        })
        .unwrap_or_default();

    let mut payload = json!({
        "summary": new.summary,
        "description": new.description,
        "status": { "id": CODE_MOVE_STATUS_ID },
        "custom_fields": custom_fields,
        "tags": tags,
    });
    if let Some(obj) = payload.as_object_mut() {
        for key in ["project", "view_state", "priority", "severity", "reproducibility", "handler"] {
            if let Some(id) = id_of(key) {
                obj.insert(key.to_string(), json!({ "id": id }));
            }
        }
        if let Some(category) = template.pointer("/category/name") {
            obj.insert("category".into(), json!({ "name": category }));
        }
        for key in ["sticky", "additional_information", "steps_to_reproduce"] {
            if let Some(v) = template.get(key) {
                obj.insert(key.to_string(), v.clone());
            }
        }
    } else {
        warn!("clone payload is not an object");
    }
    payload
}

fn custom(id: u64, value: &str) -> Value {
    json!({ "field": { "id": id }, "value": value })
}

/// Unix timestamp of midnight UTC on `date`.
fn er_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ticket() -> NewTicket {
        NewTicket {
            template: 250,
            summary: "<b>E5</b> Totals".into(),
            description: "Totals\n\nMove\n\nOriginal Ticket: <b>250</b>".into(),
            record_type: "Code Move".into(),
            target_version: "6.2".into(),
            target_patch: "6.2.1".into(),
            qa_owner: "qa-team".into(),
            er_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        }
    }

    #[test]
    fn issue_maps_record_type_and_original_link() {
        let issue: Issue = serde_json::from_value(json!({
            "id": 300,
            "summary": "Clone",
            "description": "Body\n\nOriginal Ticket: <b>250</b>",
            "notes": [{ "text": "first" }],
            "resolution": { "id": 10, "name": "For Submitter" },
            "tags": [{ "id": 7, "name": "Review Awaited" }],
            "custom_fields": [
                { "field": { "id": 1, "name": "Record Type" }, "value": "Code Move" }
            ]
        }))
        .unwrap();
        let ticket = issue.into_ticket();
        assert_eq!(ticket.kind, TicketKind::CodeMove);
        assert_eq!(ticket.original_ticket, Some(250));
        assert_eq!(ticket.resolution, "For Submitter");
        assert_eq!(ticket.tags, vec![7]);
        assert_eq!(ticket.notes, vec!["first".to_string()]);
    }

    #[test]
    fn resolution_prefers_label_over_name() {
        let issue = |resolution: Value| -> Issue {
            serde_json::from_value(json!({ "id": 301, "resolution": resolution })).unwrap()
        };
        let labelled = issue(json!({
            "id": 90,
            "name": "for_submitter",
            "label": "For Submitter"
        }));
        assert_eq!(labelled.into_ticket().resolution, "For Submitter");

        let unlabelled = issue(json!({ "id": 20, "name": "fixed" }));
        assert_eq!(unlabelled.into_ticket().resolution, "fixed");
    }

    #[test]
    fn clone_payload_overrides_release_fields() {
        let template = json!({
            "id": 250,
            "project": { "id": 3, "name": "Regression" },
            "category": { "id": 9, "name": "Dining" },
            "priority": { "id": 30, "name": "normal" },
            "sticky": false,
            "tags": [{ "id": 4, "name": "Hotfix" }],
            "custom_fields": [
                { "field": { "id": 2, "name": "Target Version" }, "value": "6.1" },
                { "field": { "id": 12, "name": "Platform" }, "value": "Web" }
            ]
        });
        let payload = clone_payload(&template, &new_ticket());

        assert_eq!(payload["project"], json!({ "id": 3 }));
        assert_eq!(payload["category"], json!({ "name": "Dining" }));
        assert_eq!(payload["status"], json!({ "id": 50 }));
        assert_eq!(payload["tags"], json!([{ "name": "Hotfix" }]));

        let fields = payload["custom_fields"].as_array().unwrap();
        let value_of = |id: u64| {
            fields
                .iter()
                .find(|f| f["field"]["id"] == json!(id))
                .map(|f| f["value"].clone())
        };
        assert_eq!(value_of(2), Some(json!("6.2")));
        assert_eq!(value_of(12), Some(json!("Web")));
        assert_eq!(value_of(18), Some(json!("1793577600")));
        assert_eq!(fields.iter().filter(|f| f["field"]["id"] == json!(2)).count(), 1);
    }
}
