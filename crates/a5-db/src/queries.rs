use crate::models::{ChatRow, MessageRow, UserRow};
use crate::Database;
use a5_types::models::Role;
use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, role, content, model_id, input_tokens, output_tokens, created_at";

const CHAT_COLUMNS: &str = "c.id, c.user_id, c.model_id, c.title, c.created_at, c.updated_at,
     (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id),
     (SELECT m.content FROM messages m WHERE m.chat_id = c.id ORDER BY m.created_at, m.id LIMIT 1)";

/// Millisecond RFC 3339 timestamps sort lexicographically in creation order.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    /// Store (or clear, with `None`) the user's sealed provider key.
    /// Returns false when the user does not exist.
    pub fn set_user_api_key(&self, id: &str, sealed: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET api_key = ?1 WHERE id = ?2",
                rusqlite::params![sealed, id],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn get_user_api_key(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT api_key FROM users WHERE id = ?1", [id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .map(Option::flatten)
        })
    }

    /// Sealed provider key of the user owning `chat_id`, if they set one.
    pub fn chat_owner_api_key(&self, chat_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT u.api_key FROM chats c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
                [chat_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
    }

    // -- Chats --

    pub fn create_chat(&self, id: &str, user_id: &str, model_id: Option<&str>) -> Result<ChatRow> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO chats (id, user_id, model_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id, user_id, model_id, ts],
            )?;
            query_chat(conn, id)?.ok_or_else(|| anyhow!("Chat vanished after insert: {}", id))
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// The chat, but only if `user_id` owns it.
    pub fn get_chat_for_user(&self, id: &str, user_id: &str) -> Result<Option<ChatRow>> {
        Ok(self.get_chat(id)?.filter(|chat| chat.user_id == user_id))
    }

    /// All chats owned by `user_id`, most recently updated first.
    pub fn list_chats(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats c WHERE c.user_id = ?1 ORDER BY c.updated_at DESC",
                CHAT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a chat owned by `user_id`. Messages go with it via ON DELETE CASCADE.
    /// Returns false when nothing matched.
    pub fn delete_chat(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM chats WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn set_chat_model(&self, id: &str, model_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE chats SET model_id = ?2, updated_at = ?3 WHERE id = ?1",
                (id, model_id, now()),
            )?;
            if updated == 0 {
                return Err(anyhow!("Chat not found: {}", id));
            }
            Ok(())
        })
    }

    pub fn touch_chat(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE chats SET updated_at = ?2 WHERE id = ?1", (id, now()))?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
        model_id: Option<&str>,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO messages (chat_id, role, content, model_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![chat_id, role.as_str(), content, model_id, ts],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or_else(|| anyhow!("Message vanished after insert: {}", id))
        })
    }

    /// Grow a streaming message in place.
    pub fn append_message_content(&self, id: i64, delta: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET content = content || ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, delta, now()],
            )?;
            if updated == 0 {
                return Err(anyhow!("Message not found: {}", id));
            }
            Ok(())
        })
    }

    pub fn set_message_tokens(
        &self,
        id: i64,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET input_tokens = ?2, output_tokens = ?3, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, input_tokens, output_tokens, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Most recently created message of `role` in a chat.
    pub fn latest_message(&self, chat_id: &str, role: Role) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 AND role = ?2
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, (chat_id, role.as_str()), message_from_row)
                .optional()
        })
    }

    /// Full history of a chat, oldest first.
    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            created_at: row.get(3)?,
        })
    })
    .optional()
}

fn query_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let sql = format!("SELECT {} FROM chats c WHERE c.id = ?1", CHAT_COLUMNS);
    conn.query_row(&sql, [id], chat_from_row).optional()
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        model_id: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        message_count: row.get::<_, i64>(6)? as usize,
        first_message: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        model_id: row.get(4)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
