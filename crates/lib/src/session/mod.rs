//! Conversation session: the ordered message log, the send state machine, persistence,
//! and the user's display identity.
//!
//! One [`SessionController`] owns one conversation. It is the only writer of the keys below
//! in its [`KeyValueStore`].

mod controller;
mod identity;
mod message;
mod store;

pub use controller::{SendOutcome, SendState, SendTask, SessionConfig, SessionController, SessionError};
pub use identity::{Identity, DEFAULT_DISPLAY_NAME};
pub use message::{new_message_id, Message, Role, STREAMING_ID, WELCOME_ID};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};

/// Conversation log (JSON array of messages).
pub const HISTORY_KEY: &str = "chat-history";
/// Display name (JSON string).
pub const USERNAME_KEY: &str = "chat-username";
/// User avatar reference (JSON string).
pub const USER_AVATAR_KEY: &str = "user-avatar";
/// Assistant avatar reference (JSON string).
pub const ASSISTANT_AVATAR_KEY: &str = "assistant-avatar";
