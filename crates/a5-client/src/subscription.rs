use tracing::{debug, info, warn};
use uuid::Uuid;

use a5_types::events::{GatewayCommand, GatewayFrame};
use a5_types::models::{MessageId, MessageSnapshot};

use crate::error::ClientError;
use crate::transcript::{Transcript, TranscriptChange};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing(Uuid),
    Subscribed(Uuid),
}

/// Binds the selected conversation to exactly one cable subscription and
/// routes its events into the transcript.
pub struct SubscriptionManager<T> {
    transport: T,
    state: SubscriptionState,
    transcript: Transcript,
}

impl<T: Transport> SubscriptionManager<T> {
    pub fn new(transport: T) -> Self {
        Self::with_transcript(transport, Transcript::new())
    }

    pub fn with_transcript(transport: T, transcript: Transcript) -> Self {
        Self {
            transport,
            state: SubscriptionState::Unsubscribed,
            transcript,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// The conversation being followed, confirmed or not.
    pub fn selected(&self) -> Option<Uuid> {
        match self.state {
            SubscriptionState::Unsubscribed => None,
            SubscriptionState::Subscribing(id) | SubscriptionState::Subscribed(id) => Some(id),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Switch to `chat_id`, seeding the transcript with `history`.
    /// The old subscription is torn down before the new one is requested.
    pub fn select(&mut self, chat_id: Uuid, history: Vec<MessageSnapshot>) -> Result<(), ClientError> {
        if self.selected() == Some(chat_id) {
            return Ok(());
        }
        self.teardown()?;

        self.transcript.seed(history);
        self.transport.send(GatewayCommand::Subscribe { chat_id })?;
        self.state = SubscriptionState::Subscribing(chat_id);
        info!("Subscribing to chat {}", chat_id);
        Ok(())
    }

    /// Drop the current conversation and its transcript.
    pub fn deselect(&mut self) -> Result<(), ClientError> {
        self.teardown()?;
        self.transcript.clear();
        Ok(())
    }

    /// Ask for the selected chat again after the connection was re-established.
    /// Events published while disconnected are not replayed.
    pub fn resubscribe(&mut self) -> Result<(), ClientError> {
        let Some(chat_id) = self.selected() else {
            return Ok(());
        };
        self.transport.send(GatewayCommand::Subscribe { chat_id })?;
        self.state = SubscriptionState::Subscribing(chat_id);
        debug!("Resubscribing to chat {}", chat_id);
        Ok(())
    }

    /// Swap in a freshly connected transport and ask for the selected chat
    /// again. The transcript is kept as is.
    pub fn reconnect(&mut self, transport: T) -> Result<(), ClientError> {
        self.transport = transport;
        info!("Transport replaced");
        self.resubscribe()
    }

    fn teardown(&mut self) -> Result<(), ClientError> {
        if let Some(old) = self.selected() {
            self.state = SubscriptionState::Unsubscribed;
            self.transport.send(GatewayCommand::Unsubscribe { chat_id: old })?;
            debug!("Unsubscribed from chat {}", old);
        }
        Ok(())
    }

    /// Feed one frame received from the server.
    pub fn handle_frame(&mut self, frame: GatewayFrame) -> TranscriptChange {
        match frame {
            GatewayFrame::Welcome { user_id } => {
                debug!("Cable welcomed {}", user_id);
            }
            GatewayFrame::ConfirmSubscription { chat_id } => {
                if self.state == SubscriptionState::Subscribing(chat_id) {
                    self.state = SubscriptionState::Subscribed(chat_id);
                    info!("Subscribed to chat {}", chat_id);
                }
            }
            GatewayFrame::RejectSubscription { chat_id } => {
                if self.selected() == Some(chat_id) {
                    warn!("Subscription to chat {} was rejected", chat_id);
                    self.state = SubscriptionState::Unsubscribed;
                }
            }
            GatewayFrame::Event { chat_id, event } => {
                if self.selected() == Some(chat_id) {
                    return self.transcript.apply(event);
                }
                debug!("Dropping {} event for unselected chat {}", event.kind(), chat_id);
            }
        }
        TranscriptChange::Ignored
    }

    /// Send a message to the selected chat, showing it optimistically.
    pub fn send(&mut self, content: &str, model_id: Option<String>) -> Result<TranscriptChange, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let chat_id = self.selected().ok_or(ClientError::NoConversation)?;

        let change = self.transcript.local_send(content);
        self.transport.send(GatewayCommand::SendMessage {
            chat_id,
            content: content.to_string(),
            model_id,
        })?;
        Ok(change)
    }

    /// Retry the turn that ended in error entry `error_id`. Returns false when
    /// there is nothing to retry.
    pub fn retry(&mut self, error_id: &MessageId) -> Result<bool, ClientError> {
        let chat_id = self.selected().ok_or(ClientError::NoConversation)?;
        let Some(content) = self.transcript.retry(error_id) else {
            return Ok(false);
        };
        self.transport.send(GatewayCommand::SendMessage {
            chat_id,
            content,
            model_id: None,
        })?;
        Ok(true)
    }
}
