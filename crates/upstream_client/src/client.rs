//! Upstream HTTP client

use log::{error, info, warn};
use reqwest::Client;
use serde_json::json;

use crate::config::UpstreamConfig;
use crate::error::{Result, UpstreamError};
use crate::models::{ChatReply, ChatRequest};

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = Client::builder()
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Submit a prompt. The reply carries Upstream's completion status; tokens
    /// arrive separately through the Bus.
    ///
    /// A reply body that fails to parse is reported as `BadReply` so the
    /// coordinator can treat it as "no completion signal" and keep waiting on
    /// the Bus.
    pub async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = format!("{}/chat", self.config.base_url);
        info!(
            "Submitting chat {} for session {} to {}",
            request.chat_id, request.session_id, url
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.config.chat_deadline)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!("Upstream chat call failed: HTTP {} body {}", status, body);
            return Err(UpstreamError::Status { status, body });
        }

        ChatReply::parse(&body)
            .ok_or_else(|| UpstreamError::BadReply(format!("unparseable chat reply: {body}")))
    }

    /// Forward a stop intent. Best-effort with a long deadline; the caller
    /// continues local cleanup whatever happens here.
    pub async fn stop_chat(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: Option<&str>,
        instance_id: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/stop", self.config.base_url);
        let payload = json!({
            "user_id": user_id,
            "session_id": session_id,
            "chat_id": chat_id,
            "instance_id": instance_id,
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.config.stop_deadline)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream stop returned HTTP {}: {}", status, body);
            return Err(UpstreamError::Status { status, body });
        }
        Ok(())
    }

    /// Ask Upstream to publish its latest session list onto the session-index
    /// queue. The authoritative payload arrives via the Bus, not this reply.
    pub async fn request_session_names(&self, user_id: &str) -> Result<()> {
        let url = format!("{}/session_name", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.config.metadata_deadline)
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }
        Ok(())
    }

    /// Ask Upstream to publish a session's transcript onto the
    /// session-history queue.
    pub async fn request_session_history(&self, user_id: &str, session_id: &str) -> Result<()> {
        let url = format!("{}/sessionhistory", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.config.history_deadline)
            .json(&json!({ "user_id": user_id, "session_id": session_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }
        Ok(())
    }

    /// Delete a session on Upstream. Best-effort.
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<()> {
        let url = format!("{}/deletesession/{}", self.config.base_url, session_id);
        let response = self
            .client
            .delete(&url)
            .timeout(self.config.metadata_deadline)
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream delete returned HTTP {}: {}", status, body);
            return Err(UpstreamError::Status { status, body });
        }
        Ok(())
    }
}
