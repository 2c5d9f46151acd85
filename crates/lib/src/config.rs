//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wellchat/config.json`) and environment.
//! Every field has a default, so a missing file or `{}` yields a working setup against a
//! local Ollama instance.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay server settings (HTTP + SSE).
    #[serde(default)]
    pub relay: RelayConfig,

    /// Upstream model service (Ollama) settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Where the conversation log and identity are persisted.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Relay bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Port for the relay HTTP server (default 8000).
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_relay_bind")]
    pub bind: String,
}

fn default_relay_port() -> u16 {
    8000
}

fn default_relay_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            bind: default_relay_bind(),
        }
    }
}

/// Model service endpoint, model name, sampling options, and probe timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Ollama base URL. Overridden by OLLAMA_BASE_URL env.
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    /// Model name as shown by `ollama list`. Overridden by WELLCHAT_MODEL env.
    #[serde(default = "default_upstream_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Forwarded to Ollama as `options.num_predict`.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Seconds between connectivity probes (default 30).
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Upper bound for a single probe (default 3).
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Upper bound for opening a chat stream, up to the response head (default 60).
    /// The streamed body itself is not limited.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_upstream_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_upstream_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            model: default_upstream_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Persistent state file location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// State file path. Relative paths are resolved against the config file's parent.
    /// Omit to use `state.json` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the upstream base URL: env OLLAMA_BASE_URL overrides config. Trailing slashes are removed.
pub fn resolve_upstream_base_url(config: &Config) -> String {
    non_empty_env("OLLAMA_BASE_URL")
        .unwrap_or_else(|| config.upstream.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the model name: env WELLCHAT_MODEL overrides config; blank falls back to the default.
pub fn resolve_model(config: &Config) -> String {
    non_empty_env("WELLCHAT_MODEL")
        .or_else(|| {
            let m = config.upstream.model.trim();
            if m.is_empty() {
                None
            } else {
                Some(m.to_string())
            }
        })
        .unwrap_or_else(default_upstream_model)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WELLCHAT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".wellchat").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the state file: `storage.path` if set (relative paths resolved against the config
/// file's parent), otherwise `state.json` next to the config file.
pub fn resolve_state_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.storage.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("state.json"),
    }
}

/// Load config from the given path (or WELLCHAT_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
