use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use a5_db::Database;
use a5_db::secrets::SecretCipher;
use a5_llm::TokenSource;
use a5_types::events::ChannelEvent;
use a5_types::models::{MessageId, MessageSnapshot, Role};

use crate::chat::{ChatSession, blocking};
use crate::dispatcher::Dispatcher;

/// Runs one generation per `send_message` command and broadcasts its
/// progress to the chat's subscribers.
///
/// Event order for one invocation: `user_message` at most once (on the first
/// chunk), one `stream` per non-empty chunk, then either `final` or a single
/// `error`. Two invocations racing on the same chat may pick up each
/// other's records; nothing serializes them.
#[derive(Clone)]
pub struct GenerationDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    source: Arc<dyn TokenSource>,
    default_model: String,
    /// Opens the provider keys users stored through settings.
    cipher: SecretCipher,
}

impl GenerationDriver {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        source: Arc<dyn TokenSource>,
        default_model: impl Into<String>,
        cipher: SecretCipher,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                db,
                dispatcher,
                source,
                default_model: default_model.into(),
                cipher,
            }),
        }
    }

    /// Run a generation detached from the caller. Failures end at the task
    /// root as an `error` broadcast.
    pub fn spawn(
        &self,
        chat_id: Uuid,
        content: String,
        model_id: Option<String>,
    ) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.run(chat_id, content, model_id).await })
    }

    pub async fn run(&self, chat_id: Uuid, content: String, model_id: Option<String>) {
        match self.generate(chat_id, &content, model_id.as_deref()).await {
            Ok(()) => info!("Chat {}: generation finished", chat_id),
            Err(e) => {
                error!("Chat {}: generation failed: {:#}", chat_id, e);
                self.inner.dispatcher.broadcast(
                    chat_id,
                    ChannelEvent::Error {
                        message: MessageSnapshot::generation_failed(),
                    },
                );
            }
        }
    }

    async fn generate(&self, chat_id: Uuid, content: &str, model_id: Option<&str>) -> Result<()> {
        let inner = &self.inner;
        let cid = chat_id.to_string();

        if let Some(model) = model_id.filter(|m| !m.is_empty()) {
            let (cid, model) = (cid.clone(), model.to_string());
            blocking(&inner.db, move |db| db.set_chat_model(&cid, &model)).await?;
        }

        let session = ChatSession::new(
            inner.db.clone(),
            inner.source.clone(),
            cid.clone(),
            inner.default_model.clone(),
        )
        .with_api_key(self.owner_api_key(&cid).await);

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (asked, relayed) = tokio::join!(
            session.ask(content, chunk_tx),
            self.relay(chat_id, chunk_rx)
        );
        relayed?;
        let assistant = asked?;

        inner.dispatcher.broadcast(
            chat_id,
            ChannelEvent::Final {
                message: assistant.to_snapshot(),
            },
        );
        Ok(())
    }

    /// Broadcast chunks as the session reports them. Returning early drops
    /// `chunks`, which aborts the session.
    async fn relay(&self, chat_id: Uuid, mut chunks: mpsc::UnboundedReceiver<String>) -> Result<()> {
        let inner = &self.inner;
        let cid = chat_id.to_string();
        let mut user_broadcasted = false;
        let mut assistant_id: Option<i64> = None;

        while let Some(chunk) = chunks.recv().await {
            // The session persisted the user message before streaming;
            // announce it once so every tab converges on the durable id.
            if !user_broadcasted {
                let cid = cid.clone();
                let user = blocking(&inner.db, move |db| db.latest_message(&cid, Role::User)).await?;
                if let Some(user) = user {
                    inner.dispatcher.broadcast(
                        chat_id,
                        ChannelEvent::UserMessageConfirmed {
                            message: user.to_snapshot(),
                        },
                    );
                    user_broadcasted = true;
                }
            }

            if chunk.is_empty() {
                continue;
            }
            if assistant_id.is_none() {
                let cid = cid.clone();
                assistant_id = blocking(&inner.db, move |db| db.latest_message(&cid, Role::Assistant))
                    .await?
                    .map(|m| m.id);
            }
            if let Some(id) = assistant_id {
                inner.dispatcher.broadcast(
                    chat_id,
                    ChannelEvent::StreamChunk {
                        message_id: MessageId::durable(id),
                        content: chunk,
                    },
                );
            }
        }
        Ok(())
    }

    /// The chat owner's own provider key. Any failure falls back to the
    /// server key.
    async fn owner_api_key(&self, cid: &str) -> Option<String> {
        let lookup_id = cid.to_string();
        let sealed = match blocking(&self.inner.db, move |db| db.chat_owner_api_key(&lookup_id)).await {
            Ok(sealed) => sealed?,
            Err(e) => {
                warn!("Chat {}: provider key lookup failed: {:#}", cid, e);
                return None;
            }
        };

        match self.inner.cipher.open(&sealed) {
            Ok(key) => {
                debug!("Chat {}: using the owner's provider key", cid);
                Some(key)
            }
            Err(e) => {
                warn!("Chat {}: stored provider key unreadable, using server key: {:#}", cid, e);
                None
            }
        }
    }
}
