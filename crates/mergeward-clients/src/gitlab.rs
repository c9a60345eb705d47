//! GitLab merge request client
//!
//! Request URLs found in ticket notes are routed to a numeric project id
//! through the repository area they name; the request number is the last
//! path segment.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mergeward_core::collab::{MergeReceipt, SourceControl};
use mergeward_core::model::request_number;
use mergeward_core::{ChangeRequest, RepoArea, RequestState};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{check, ClientError, Result};

const SERVICE: &str = "gitlab";

#[derive(Debug, Deserialize)]
struct MergeRequest {
    #[serde(default)]
    iid: Option<u64>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    target_branch: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<User>,
    #[serde(default)]
    author: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    #[serde(default)]
    state: Option<String>,
}

/// Project id and request number a request URL resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    project: u64,
    iid: u64,
}

/// GitLab API client
pub struct GitLabClient {
    http: Client,
    base_url: String,
    projects: BTreeMap<RepoArea, u64>,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: &str, projects: BTreeMap<RepoArea, u64>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(token).map_err(|e| ClientError::Setup(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert("PRIVATE-TOKEN", auth);

        let http = crate::http_builder(crate::REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            projects,
        })
    }

    fn route(&self, url: &str) -> Result<Route> {
        let project = RepoArea::from_url(url)
            .and_then(|area| self.projects.get(&area).copied())
            .ok_or_else(|| ClientError::Unroutable(url.to_string()))?;
        let iid = request_number(url).ok_or_else(|| ClientError::Unroutable(url.to_string()))?;
        Ok(Route { project, iid })
    }

    fn endpoint(&self, route: Route) -> String {
        format!(
            "{}/api/v4/projects/{}/merge_requests/{}",
            self.base_url, route.project, route.iid
        )
    }

    async fn fetch(&self, url: &str) -> Result<Option<ChangeRequest>> {
        let route = self.route(url)?;
        let response = self.http.get(self.endpoint(route)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(url, "merge request not found");
            return Ok(None);
        }
        let mr: MergeRequest = check(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::payload(SERVICE, e))?;
        let state = RequestState::parse(&mr.state)
            .ok_or_else(|| ClientError::payload(SERVICE, format!("unknown state {:?}", mr.state)))?;

        Ok(Some(ChangeRequest {
            url: url.to_string(),
            iid: mr.iid.unwrap_or(route.iid),
            state,
            target_branch: mr.target_branch,
            labels: mr.labels,
            assignee: mr.assignee.map(|u| u.name),
            author: mr.author.map(|u| u.name),
        }))
    }

    async fn accept(&self, url: &str) -> Result<MergeReceipt> {
        let route = self.route(url)?;
        let response = self
            .http
            .put(format!("{}/merge", self.endpoint(route)))
            .send()
            .await?;
        let body: MergeResponse = check(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::payload(SERVICE, e))?;
        Ok(MergeReceipt {
            state: body.state.as_deref().and_then(RequestState::parse),
        })
    }
}

#[async_trait]
impl SourceControl for GitLabClient {
    async fn fetch_change_request(
        &self,
        url: &str,
    ) -> mergeward_core::Result<Option<ChangeRequest>> {
        self.fetch(url).await.map_err(ClientError::source_control)
    }

    async fn merge(&self, url: &str) -> mergeward_core::Result<MergeReceipt> {
        self.accept(url).await.map_err(ClientError::source_control)
    }
}
