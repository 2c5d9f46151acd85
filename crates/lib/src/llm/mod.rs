//! Upstream model service client (Ollama).
//!
//! Opens streaming chat requests (NDJSON bodies) and answers version probes against a local
//! Ollama instance.

mod ollama;

pub use ollama::{
    ChatMessage, ChatOptions, ChatRole, OllamaClient, OllamaError, VersionInfo,
    DEFAULT_REQUEST_TIMEOUT,
};
