//! Conversation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::prompt;

/// Id held by the single assistant message that is still streaming.
pub const STREAMING_ID: &str = "streaming";

/// Id of the seeded welcome message.
pub const WELCOME_ID: &str = "welcome-message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Fresh permanent message id.
pub fn new_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn welcome() -> Self {
        Self {
            id: WELCOME_ID.to_string(),
            role: Role::Assistant,
            content: prompt::WELCOME_MESSAGE.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Sentinel assistant message for a reply still being generated.
    pub fn streaming(content: impl Into<String>) -> Self {
        Self {
            id: STREAMING_ID.to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.id == STREAMING_ID
    }

    /// Give the sentinel its permanent id and the finalize timestamp.
    pub fn finalize(&mut self) {
        self.id = new_message_id();
        self.timestamp = Utc::now();
    }

    /// Upstream form (role + content).
    pub fn to_chat(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user(self.content.clone()),
            Role::Assistant => ChatMessage::assistant(self.content.clone()),
        }
    }
}
