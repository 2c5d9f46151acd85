//! Key-value persistence for session state. Values are JSON-encoded strings.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persistent key-value store keyed by logical name.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, or None if it was never written.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// In-memory store (tests, embedding without disk).
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object file (`{ key: value, ... }`). The whole file is rewritten
/// on every set, via a temporary file and rename.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Load store from path; if the file is missing or invalid, starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("ignoring unreadable state file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.save(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "\"v\"".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("\"v\""));
    }

    #[tokio::test]
    async fn file_store_persists_across_loads() {
        let dir = std::env::temp_dir().join(format!("wellchat-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("state.json");

        let store = JsonFileStore::load(&path).await;
        assert_eq!(store.get("chat-username").await.unwrap(), None);
        store
            .set("chat-username", "\"Ada\"".to_string())
            .await
            .unwrap();

        let reloaded = JsonFileStore::load(&path).await;
        assert_eq!(
            reloaded.get("chat-username").await.unwrap().as_deref(),
            Some("\"Ada\"")
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn file_store_ignores_corrupt_file() {
        let dir = std::env::temp_dir().join(format!("wellchat-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        std::fs::write(&path, "{ truncated").unwrap();
        let store = JsonFileStore::load(&path).await;
        assert_eq!(store.get("chat-history").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
