//! Relay HTTP server: `POST /api/chat` (SSE), `GET /api/ollama-status`, `GET /health`.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use super::bridge::{OllamaBridge, SseStream};
use super::protocol::{ChatRelayRequest, StatusResponse};
use crate::config::{self, Config};
use crate::llm::ChatOptions;
use crate::prompt;
use crate::status::ConnectivityState;

/// Shared state for the relay routes.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    pub bridge: OllamaBridge,
    /// Upper bound for the status endpoint's upstream probe.
    pub probe_timeout: Duration,
}

impl RelayState {
    pub fn new(config: Config) -> Self {
        let bridge = OllamaBridge::from_config(&config);
        let probe_timeout = config.upstream.probe_timeout();
        Self {
            config: Arc::new(config),
            bridge,
            probe_timeout,
        }
    }
}

/// Routes without a listener, for embedding or tests. Any origin may call the relay so a
/// browser UI served elsewhere can reach it.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_relay))
        .route("/api/ollama-status", get(ollama_status))
        .route("/health", get(health_http))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the relay server; binds to config.relay.bind:config.relay.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_relay(config: Config) -> Result<()> {
    let bind = config.relay.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!(
            "relay bound to non-loopback address {}; it has no authentication",
            bind
        );
    }
    let state = RelayState::new(config.clone());
    log::info!(
        "relaying to {} (model {})",
        state.bridge.client().base_url(),
        state.bridge.model()
    );
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.relay.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST /api/chat: opens the upstream first so an unreachable model service is a 502,
/// then streams the reply as SSE.
async fn chat_relay(
    State(state): State<RelayState>,
    Json(req): Json<ChatRelayRequest>,
) -> Response {
    let system_prompt = req
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(prompt::SYSTEM_PROMPT);
    let defaults = state.bridge.options();
    let options = ChatOptions {
        temperature: req.temperature.unwrap_or(defaults.temperature),
        num_predict: req.max_tokens.unwrap_or(defaults.num_predict),
    };
    match state
        .bridge
        .stream_chat_with(req.messages, system_prompt, options)
        .await
    {
        Ok(stream) => sse_response(stream),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn sse_response(stream: SseStream) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

/// GET /api/ollama-status: always 200; the body says whether the model service answered.
async fn ollama_status(State(state): State<RelayState>) -> Json<StatusResponse> {
    let res = match state.bridge.client().version(state.probe_timeout).await {
        Ok(v) => StatusResponse {
            status: ConnectivityState::Online,
            message: "Ollama service is running".to_string(),
            version: Some(v.version.unwrap_or_else(|| "unknown".to_string())),
            model: Some(state.bridge.model().to_string()),
        },
        Err(e) => {
            log::debug!("status check failed: {}", e);
            StatusResponse {
                status: ConnectivityState::Offline,
                message: format!("Failed to connect to Ollama service: {}", e),
                version: None,
                model: None,
            }
        }
    };
    Json(res)
}

/// GET /health: liveness of the relay itself.
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "port": state.config.relay.port,
    }))
}
