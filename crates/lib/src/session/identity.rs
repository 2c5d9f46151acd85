//! Display name and avatar references for the two chat participants.

use serde::{Deserialize, Serialize};

use super::store::{KeyValueStore, StoreError};
use super::{ASSISTANT_AVATAR_KEY, USERNAME_KEY, USER_AVATAR_KEY};

pub const DEFAULT_DISPLAY_NAME: &str = "User";

const USER_AVATAR_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=";
const ASSISTANT_AVATAR_BASE: &str = "https://api.dicebear.com/7.x/bottts/svg?seed=";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: String,
    pub user_avatar: String,
    pub assistant_avatar: String,
}

/// Avatar seed in `0..1000`.
fn avatar_seed() -> u32 {
    let mut bytes = [0u8; 4];
    if let Err(e) = getrandom::getrandom(&mut bytes) {
        log::debug!("getrandom failed, seeding avatar from clock: {}", e);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        return nanos % 1000;
    }
    u32::from_le_bytes(bytes) % 1000
}

fn new_user_avatar() -> String {
    format!("{}{}", USER_AVATAR_BASE, avatar_seed())
}

fn new_assistant_avatar() -> String {
    format!("{}{}", ASSISTANT_AVATAR_BASE, avatar_seed())
}

async fn read_string(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>, StoreError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<String>(&raw) {
        Ok(s) if !s.trim().is_empty() => Ok(Some(s)),
        Ok(_) => Ok(None),
        Err(e) => {
            log::warn!("ignoring malformed value for {}: {}", key, e);
            Ok(None)
        }
    }
}

async fn write_string(store: &dyn KeyValueStore, key: &str, value: &str) -> Result<(), StoreError> {
    store.set(key, serde_json::to_string(value)?).await
}

impl Identity {
    /// Load from the store. Missing avatars are generated and written back; a missing name
    /// falls back to the default without being written.
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let display_name = read_string(store, USERNAME_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        let user_avatar = match read_string(store, USER_AVATAR_KEY).await? {
            Some(a) => a,
            None => {
                let a = new_user_avatar();
                write_string(store, USER_AVATAR_KEY, &a).await?;
                a
            }
        };
        let assistant_avatar = match read_string(store, ASSISTANT_AVATAR_KEY).await? {
            Some(a) => a,
            None => {
                let a = new_assistant_avatar();
                write_string(store, ASSISTANT_AVATAR_KEY, &a).await?;
                a
            }
        };
        Ok(Self {
            display_name,
            user_avatar,
            assistant_avatar,
        })
    }

    /// Set and persist the display name. Caller guarantees `name` is non-empty.
    pub(crate) async fn save_display_name(
        &mut self,
        store: &dyn KeyValueStore,
        name: &str,
    ) -> Result<(), StoreError> {
        self.display_name = name.to_string();
        write_string(store, USERNAME_KEY, name).await
    }

    /// Replace both avatar references and persist them.
    pub(crate) async fn regenerate_avatars(
        &mut self,
        store: &dyn KeyValueStore,
    ) -> Result<(), StoreError> {
        self.user_avatar = new_user_avatar();
        self.assistant_avatar = new_assistant_avatar();
        write_string(store, USER_AVATAR_KEY, &self.user_avatar).await?;
        write_string(store, ASSISTANT_AVATAR_KEY, &self.assistant_avatar).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;

    #[tokio::test]
    async fn fresh_store_gets_defaults_and_persisted_avatars() {
        let store = MemoryStore::new();
        let id = Identity::load(&store).await.unwrap();
        assert_eq!(id.display_name, DEFAULT_DISPLAY_NAME);
        assert!(id.user_avatar.starts_with(USER_AVATAR_BASE));
        assert!(id.assistant_avatar.starts_with(ASSISTANT_AVATAR_BASE));
        assert_eq!(store.get(USERNAME_KEY).await.unwrap(), None);

        let again = Identity::load(&store).await.unwrap();
        assert_eq!(again, id);
    }

    #[tokio::test]
    async fn saved_name_and_regenerated_avatars_persist() {
        let store = MemoryStore::new();
        let mut id = Identity::load(&store).await.unwrap();
        id.save_display_name(&store, "Ada").await.unwrap();
        id.regenerate_avatars(&store).await.unwrap();

        let reloaded = Identity::load(&store).await.unwrap();
        assert_eq!(reloaded.display_name, "Ada");
        assert_eq!(reloaded.user_avatar, id.user_avatar);
        assert_eq!(reloaded.assistant_avatar, id.assistant_avatar);
    }

    #[test]
    fn seeds_stay_in_range() {
        for _ in 0..100 {
            assert!(avatar_seed() < 1000);
        }
    }
}
