use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageId, MessageSnapshot};

/// Events broadcast to every subscriber of one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// The user message that started a generation has been persisted.
    #[serde(rename = "user_message")]
    UserMessageConfirmed { message: MessageSnapshot },

    /// One content fragment for an assistant message that is still growing.
    #[serde(rename = "stream")]
    StreamChunk {
        message_id: MessageId,
        content: String,
    },

    /// The complete assistant message, as persisted.
    Final { message: MessageSnapshot },

    /// Synthetic assistant message announcing a failed generation.
    Error { message: MessageSnapshot },
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessageConfirmed { .. } => "user_message",
            Self::StreamChunk { .. } => "stream",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }
}

/// Frames sent FROM server TO client over the cable WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    /// Sent once after the upgrade succeeds.
    Welcome { user_id: Uuid },

    /// The subscription for `chat_id` is live.
    ConfirmSubscription { chat_id: Uuid },

    /// The chat does not exist or belongs to someone else. No stream was set up.
    RejectSubscription { chat_id: Uuid },

    /// A channel event for a chat this connection is subscribed to.
    Event { chat_id: Uuid, event: ChannelEvent },
}

/// Commands sent FROM client TO server over the cable WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GatewayCommand {
    Subscribe { chat_id: Uuid },

    Unsubscribe { chat_id: Uuid },

    /// Ask the server to answer `content` in `chat_id`, optionally switching
    /// the chat's default model first.
    SendMessage {
        chat_id: Uuid,
        content: String,
        #[serde(default)]
        model_id: Option<String>,
    },
}
