//! Transport bridge: opens the upstream chat stream and re-emits it as relay SSE bytes.

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::ndjson::Reframer;
use crate::config::{self, Config};
use crate::llm::{ChatMessage, ChatOptions, OllamaClient};

/// Relay output: SSE-framed bytes, or a terminal error if the upstream dropped mid-stream.
pub type SseStream = BoxStream<'static, Result<Bytes, RelayError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Connection refused, timeout, or non-success status before any body bytes.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The upstream connection failed after streaming began.
    #[error("upstream stream error: {0}")]
    UpstreamStream(String),
}

/// Streams one assistant reply for a conversation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `messages` (oldest first) with `system_prompt` prepended as a system message.
    /// Resolves once the upstream accepted the request; failures before that are returned
    /// here, never inside the stream.
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> Result<SseStream, RelayError>;
}

/// In-process bridge to an Ollama server.
#[derive(Clone)]
pub struct OllamaBridge {
    client: OllamaClient,
    model: String,
    options: ChatOptions,
}

impl OllamaBridge {
    pub fn new(client: OllamaClient, model: impl Into<String>, options: ChatOptions) -> Self {
        Self {
            client,
            model: model.into(),
            options,
        }
    }

    /// Bridge for the configured upstream (env overrides applied).
    pub fn from_config(config: &Config) -> Self {
        let client = OllamaClient::new(Some(config::resolve_upstream_base_url(config)))
            .with_request_timeout(config.upstream.request_timeout());
        let options = ChatOptions {
            temperature: config.upstream.temperature,
            num_predict: config.upstream.max_tokens,
        };
        Self::new(client, config::resolve_model(config), options)
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn options(&self) -> ChatOptions {
        self.options
    }

    /// Same as [`ChatTransport::stream_chat`] with per-request sampling options.
    pub async fn stream_chat_with(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
        options: ChatOptions,
    ) -> Result<SseStream, RelayError> {
        let mut upstream_messages = Vec::with_capacity(messages.len() + 1);
        upstream_messages.push(ChatMessage::system(system_prompt));
        upstream_messages.extend(messages);

        log::debug!(
            "relay: opening upstream chat ({} messages, model {})",
            upstream_messages.len(),
            self.model
        );
        let upstream = self
            .client
            .open_chat_stream(&self.model, &upstream_messages, options)
            .await
            .map_err(|e| {
                log::warn!("relay: upstream unavailable: {}", e);
                RelayError::UpstreamUnavailable(e.to_string())
            })?;
        Ok(relay_stream(upstream))
    }
}

#[async_trait]
impl ChatTransport for OllamaBridge {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system_prompt: &str,
    ) -> Result<SseStream, RelayError> {
        self.stream_chat_with(messages, system_prompt, self.options)
            .await
    }
}

/// Re-frame an upstream NDJSON body as relay SSE bytes.
///
/// A pump task reads the upstream and forwards encoded events through a bounded channel.
/// The returned stream ends after `[DONE]`, after the upstream body ends, or after yielding
/// a single `UpstreamStream` error. Dropping the returned stream stops the pump, which drops
/// (and so cancels) the upstream request.
pub fn relay_stream<S, E>(upstream: S) -> SseStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, RelayError>>(32);
    tokio::spawn(pump(upstream, tx));
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

async fn pump<S, E>(mut upstream: S, tx: mpsc::Sender<Result<Bytes, RelayError>>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut reframer = Reframer::new();
    loop {
        let next = tokio::select! {
            next = upstream.next() => next,
            _ = tx.closed() => {
                log::debug!("relay: consumer went away, dropping upstream");
                return;
            }
        };
        let (events, ended) = match next {
            Some(Ok(bytes)) => (reframer.push(&bytes), false),
            Some(Err(e)) => {
                let e = RelayError::UpstreamStream(e.to_string());
                log::warn!("relay: {}", e);
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => (reframer.finish(), true),
        };
        for event in events {
            if tx.send(Ok(event.encode())).await.is_err() {
                log::debug!("relay: consumer went away, dropping upstream");
                return;
            }
        }
        if let Some(e) = reframer.take_error() {
            log::warn!("relay: {}", e);
            let _ = tx.send(Err(e)).await;
            return;
        }
        if reframer.is_finished() {
            return;
        }
        if ended {
            log::debug!("relay: upstream body ended without a done chunk");
            return;
        }
    }
}
