//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the a5-types wire models so the DB layer stays independent.

use a5_types::models::{MessageId, MessageSnapshot, Role};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ChatRow {
    pub id: String,
    pub user_id: String,
    pub model_id: Option<String>,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
    /// Content of the oldest message, if any.
    pub first_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub model_id: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub created_at: String,
}

impl MessageRow {
    pub fn to_snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            id: MessageId::durable(self.id),
            content: self.content.clone(),
            role: Role::parse(&self.role).unwrap_or_else(|| {
                warn!("Corrupt role '{}' on message {}", self.role, self.id);
                Role::Assistant
            }),
            timestamp: parse_timestamp(&self.created_at),
            model: self.model_id.clone(),
        }
    }
}

/// Parse a stored timestamp. Rows written by this crate are RFC 3339; rows
/// created by SQLite defaults are `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
