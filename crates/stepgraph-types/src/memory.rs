//! Conversation memory types consumed by the memory collaborator.
//!
//! The engine never interprets memory content; these types only describe
//! how a session is keyed and how a stored turn is shaped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Longest text stored per message. Longer input is truncated on save.
pub const MAX_MEMORY_TEXT_CHARS: usize = 9000;

/// Default number of most recent turns returned by a load.
pub const DEFAULT_MEMORY_TURNS: usize = 10;

/// Identifies one conversation for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: String,
    pub actor_id: String,
}

impl SessionKey {
    pub fn new(session_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            actor_id: actor_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.actor_id, self.session_id)
    }
}

/// Who produced a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryRole {
    User,
    Assistant,
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryRole::User => write!(f, "USER"),
            MemoryRole::Assistant => write!(f, "ASSISTANT"),
        }
    }
}

impl FromStr for MemoryRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(MemoryRole::User),
            "ASSISTANT" => Ok(MemoryRole::Assistant),
            _ => Err(format!("unknown memory role: {s}")),
        }
    }
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: MemoryRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A user message and the response it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: MemoryMessage,
    pub assistant: MemoryMessage,
}

impl ConversationTurn {
    /// Build a turn, truncating both texts to `MAX_MEMORY_TEXT_CHARS`.
    pub fn new(user_text: &str, response_text: &str) -> Self {
        let now = Utc::now();
        Self {
            user: MemoryMessage {
                role: MemoryRole::User,
                text: truncate_chars(user_text, MAX_MEMORY_TEXT_CHARS),
                created_at: now,
            },
            assistant: MemoryMessage {
                role: MemoryRole::Assistant,
                text: truncate_chars(response_text, MAX_MEMORY_TEXT_CHARS),
                created_at: now,
            },
        }
    }

    /// Render as `ROLE: text` lines, user first.
    pub fn render(&self) -> String {
        format!(
            "{}: {}\n{}: {}\n",
            self.user.role, self.user.text, self.assistant.role, self.assistant.text
        )
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
