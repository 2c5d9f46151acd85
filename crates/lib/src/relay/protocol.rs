//! Relay HTTP wire types (chat request body and status response).

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::status::ConnectivityState;

/// Body of `POST /api/chat`: `{ messages, systemPrompt?, temperature?, max_tokens? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRelayRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Blank or absent uses the canonical system prompt.
    #[serde(rename = "systemPrompt", default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Body of `GET /api/ollama-status`. Always served with 200; `status` carries the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ConnectivityState,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
