//! HTTP client for a running relay (`POST /api/chat`, `GET /api/ollama-status`).

use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;

use super::bridge::{ChatTransport, RelayError, SseStream};
use super::protocol::{ChatRelayRequest, StatusResponse};
use crate::llm::{ChatMessage, DEFAULT_REQUEST_TIMEOUT};
use crate::status::{ConnectivityState, HealthCheck, ProbeError};

/// Talks to a relay server over HTTP; usable anywhere an in-process bridge is.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound the wait for the relay's response head. The SSE body stays unbounded.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/ollama-status: the relay's view of the model service.
    pub async fn status(&self, timeout: Duration) -> Result<StatusResponse, reqwest::Error> {
        let url = format!("{}/api/ollama-status", self.base_url);
        let res = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        res.json().await
    }
}

#[async_trait]
impl ChatTransport for RelayClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> Result<SseStream, RelayError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRelayRequest {
            messages,
            system_prompt: Some(system_prompt.to_string()),
            temperature: None,
            max_tokens: None,
        };
        let send = self.client.post(&url).json(&body).send();
        let res = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                RelayError::UpstreamUnavailable(format!(
                    "relay did not respond within {:?}",
                    self.request_timeout
                ))
            })?
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = tokio::time::timeout(self.request_timeout, res.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            return Err(RelayError::UpstreamUnavailable(format!("{} {}", status, body)));
        }
        Ok(res
            .bytes_stream()
            .map(|item| item.map_err(|e| RelayError::UpstreamStream(e.to_string())))
            .boxed())
    }
}

#[async_trait]
impl HealthCheck for RelayClient {
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        let res = self
            .status(timeout)
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        match res.status {
            ConnectivityState::Online => Ok(()),
            _ => Err(ProbeError::Failed(res.message)),
        }
    }
}
