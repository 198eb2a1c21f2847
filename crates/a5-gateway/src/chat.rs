use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::debug;

use a5_db::Database;
use a5_db::models::MessageRow;
use a5_llm::{ChatMessage, ChatRequest, StreamEvent, TokenSource};
use a5_types::models::Role;

/// Tokens buffered between the provider reader and the persisting consumer.
const TOKEN_BUFFER: usize = 64;

/// Run a database call on the blocking pool so SQLite never stalls the
/// async workers.
pub(crate) async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("DB task failed: {}", e))?
}

/// A chat bound to its persistence: asking it a question stores the user
/// message, streams the answer into a stored assistant message, and hands
/// every token on as it lands.
pub struct ChatSession {
    db: Arc<Database>,
    source: Arc<dyn TokenSource>,
    chat_id: String,
    default_model: String,
    api_key: Option<String>,
}

impl ChatSession {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn TokenSource>,
        chat_id: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            source,
            chat_id: chat_id.into(),
            default_model: default_model.into(),
            api_key: None,
        }
    }

    /// Generate with this provider key instead of the server's.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Persist `content` as a user message and generate the reply.
    ///
    /// Every token is sent on `chunks` after it has been appended to the
    /// stored assistant message. Dropping the receiving end aborts the
    /// generation. Returns the assistant message as finally stored.
    pub async fn ask(&self, content: &str, chunks: mpsc::UnboundedSender<String>) -> Result<MessageRow> {
        let chat_id = self.chat_id.clone();
        let default_model = self.default_model.clone();
        let content = content.to_string();

        let (model, messages, assistant) = blocking(&self.db, move |db| {
            let chat = db
                .get_chat(&chat_id)?
                .ok_or_else(|| anyhow!("Chat not found: {}", chat_id))?;
            let model = chat.model_id.unwrap_or(default_model);

            db.insert_message(&chat_id, Role::User, &content, Some(&model))?;

            // Earlier failed generations can leave empty assistant rows behind;
            // providers reject empty turns.
            let messages: Vec<ChatMessage> = db
                .get_messages(&chat_id)?
                .into_iter()
                .filter(|m| !m.content.is_empty())
                .map(|m| {
                    let snapshot = m.to_snapshot();
                    ChatMessage {
                        role: snapshot.role,
                        content: snapshot.content,
                    }
                })
                .collect();

            let assistant = db.insert_message(&chat_id, Role::Assistant, "", Some(&model))?;
            Ok((model, messages, assistant))
        })
        .await?;

        debug!(
            "Chat {}: generating message {} with {} ({} turns of context)",
            self.chat_id,
            assistant.id,
            model,
            messages.len()
        );

        let (tx, mut rx) = mpsc::channel(TOKEN_BUFFER);
        let request = ChatRequest {
            model,
            messages,
            api_key: self.api_key.clone(),
        };

        let produce = self.source.stream(request, tx);
        let assistant_id = assistant.id;
        let consume = async move {
            let mut usage = None;
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Token(token) => {
                        if !token.is_empty() {
                            let delta = token.clone();
                            blocking(&self.db, move |db| db.append_message_content(assistant_id, &delta))
                                .await?;
                        }
                        chunks
                            .send(token)
                            .map_err(|_| anyhow!("Chunk listener went away"))?;
                    }
                    StreamEvent::Done {
                        tokens_in,
                        tokens_out,
                    } => usage = Some((tokens_in, tokens_out)),
                }
            }
            Ok::<_, anyhow::Error>(usage)
        };

        // The consumer owns the receiver, so a failing consumer ends the producer
        let (produced, consumed) = tokio::join!(produce, consume);
        let usage = consumed?;
        produced?;

        let (id, chat_id) = (assistant_id, self.chat_id.clone());
        blocking(&self.db, move |db| {
            if let Some((tokens_in, tokens_out)) = usage {
                db.set_message_tokens(id, tokens_in, tokens_out)?;
            }
            db.touch_chat(&chat_id)?;
            db.get_message(id)?
                .ok_or_else(|| anyhow!("Assistant message vanished: {}", id))
        })
        .await
    }
}
