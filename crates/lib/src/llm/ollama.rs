//! Ollama API client (http://127.0.0.1:11434 by default).
//! Opens streaming chat (NDJSON) and reads `/api/version` for connectivity probes.

use axum::body::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default bound for a chat request to produce its response head.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
    #[error("ollama did not respond within {0:?}")]
    Timeout(Duration),
}

/// Role of a message sent upstream. `System` only ever appears as the synthetic leading entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options forwarded as Ollama `options`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub num_predict: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_predict: 2000,
        }
    }
}

/// Response of GET /api/version.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound the wait for a chat response head. Body reads stay unbounded.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/version: fails unless the service answers 2xx with a JSON body.
    pub async fn version(&self, timeout: Duration) -> Result<VersionInfo, OllamaError> {
        let url = format!("{}/api/version", self.base_url);
        let res = self.client.get(&url).timeout(timeout).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: VersionInfo = res.json().await?;
        Ok(data)
    }

    /// POST /api/chat with stream: true. Resolves once the response head has arrived with a
    /// success status; the returned stream yields raw NDJSON body bytes as they arrive, with no
    /// alignment to line boundaries. Waiting for the head is bounded by the request timeout.
    pub async fn open_chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<BoxStream<'static, Result<Bytes, reqwest::Error>>, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            stream: true,
            options,
        };
        let res = tokio::time::timeout(
            self.request_timeout,
            self.client.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| OllamaError::Timeout(self.request_timeout))??;
        if !res.status().is_success() {
            let status = res.status();
            let body = tokio::time::timeout(self.request_timeout, res.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        Ok(res.bytes_stream().boxed())
    }
}
