//! Chat webhook notifier

use async_trait::async_trait;
use mergeward_core::collab::Notifier;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::error::{check, Result};
use crate::ClientError;

const SERVICE: &str = "chat";

/// Posts `{"text": ...}` messages to an incoming webhook.
pub struct ChatNotifier {
    http: Client,
    webhook_url: String,
}

impl ChatNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let http = crate::http_builder(crate::REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        check(SERVICE, response).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn post(&self, text: &str) -> mergeward_core::Result<()> {
        self.send(text).await.map_err(ClientError::notifier)?;
        info!("Message sent successfully!");
        Ok(())
    }
}
