use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker that namespaces client-generated ids. Durable ids are SQLite row
/// ids rendered as digits, so the two can never collide.
pub const OPTIMISTIC_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Identifier of a message as seen on the wire.
///
/// Three shapes exist: durable ids assigned by the database (`"42"`),
/// optimistic ids minted by a client before the server confirms a send
/// (`"temp-3f2a..."`), and synthetic ids for error entries that are never
/// persisted (a hyphenated UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn durable(row_id: i64) -> Self {
        Self(row_id.to_string())
    }

    pub fn optimistic() -> Self {
        Self(format!("{}{}", OPTIMISTIC_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn synthetic() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_PREFIX)
    }

    /// Row id for durable ids, `None` for optimistic and synthetic ones.
    pub fn row_id(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message as carried by channel events and returned by the read API.
/// Both paths share this shape so history can seed a transcript that live
/// events then mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    /// A `final` may omit the body; an absent content reads as empty.
    #[serde(default)]
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
}

/// Content of the synthetic assistant message broadcast when a generation fails.
pub const GENERATION_FAILED_CONTENT: &str =
    "⚠️ Sorry, I couldn't complete that request. Please try again.";

impl MessageSnapshot {
    /// Synthetic assistant entry announcing a failed generation.
    pub fn generation_failed() -> Self {
        Self {
            id: MessageId::synthetic(),
            content: GENERATION_FAILED_CONTENT.to_string(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            model: None,
        }
    }
}
