use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{debug, trace};

use a5_types::events::ChannelEvent;
use a5_types::models::{MessageId, MessageSnapshot, Role};

/// How far apart an optimistic message and its server confirmation may be
/// stamped and still be considered the same message.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5);

/// What a single mutation did to the transcript. Indexes refer to
/// [`Transcript::messages`] after the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptChange {
    Appended(usize),
    Updated(usize),
    Replaced(usize),
    Removed(usize),
    Ignored,
}

/// The canonical message list of one conversation.
///
/// Entries are only ever appended, grown in place, swapped for their
/// durable twin, or removed by a retry; no event reorders prior entries.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<MessageSnapshot>,
    /// Optimistic ids still waiting for their `user_message`.
    pending: HashSet<MessageId>,
    /// Optimistic ids whose turn already got a `final` without the
    /// matching `user_message` having arrived.
    superseded: HashSet<MessageId>,
    /// Ids that received a `final`; their late chunks are dropped.
    finalized: HashSet<MessageId>,
    /// Entries that arrived as `error` events. Only these can be retried.
    errors: HashSet<MessageId>,
    tolerance: TimeDelta,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(tolerance: Duration) -> Self {
        Self {
            messages: Vec::new(),
            pending: HashSet::new(),
            superseded: HashSet::new(),
            finalized: HashSet::new(),
            errors: HashSet::new(),
            tolerance: TimeDelta::from_std(tolerance).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Replace everything with history loaded from the read API.
    pub fn seed(&mut self, history: Vec<MessageSnapshot>) {
        self.pending.clear();
        self.superseded.clear();
        self.errors.clear();
        self.finalized = history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.id.clone())
            .collect();
        self.messages = history;
    }

    pub fn clear(&mut self) {
        self.seed(Vec::new());
    }

    pub fn messages(&self) -> &[MessageSnapshot] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&MessageSnapshot> {
        self.position(id).map(|i| &self.messages[i])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Optimistic messages still awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is an error entry that [`Transcript::retry`] accepts.
    pub fn is_error(&self, id: &MessageId) -> bool {
        self.errors.contains(id)
    }

    /// The most recent error entry, if any.
    pub fn last_error(&self) -> Option<&MessageId> {
        self.messages.iter().rev().map(|m| &m.id).find(|id| self.errors.contains(*id))
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn push(&mut self, message: MessageSnapshot) -> TranscriptChange {
        self.messages.push(message);
        TranscriptChange::Appended(self.messages.len() - 1)
    }

    /// Show a message the user just sent, before the server has seen it.
    pub fn local_send(&mut self, content: &str) -> TranscriptChange {
        let message = MessageSnapshot {
            id: MessageId::optimistic(),
            content: content.to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            model: None,
        };
        self.pending.insert(message.id.clone());
        self.push(message)
    }

    /// Apply one server event.
    pub fn apply(&mut self, event: ChannelEvent) -> TranscriptChange {
        match event {
            ChannelEvent::UserMessageConfirmed { message } => self.on_confirmed(message),
            ChannelEvent::StreamChunk {
                message_id,
                content,
            } => self.on_chunk(message_id, &content),
            ChannelEvent::Final { message } => self.on_final(message),
            ChannelEvent::Error { message } => {
                self.errors.insert(message.id.clone());
                self.push(message)
            }
        }
    }

    fn on_confirmed(&mut self, message: MessageSnapshot) -> TranscriptChange {
        if self.position(&message.id).is_some() {
            trace!("Message {} already confirmed", message.id);
            return TranscriptChange::Ignored;
        }

        let twin = self.messages.iter().position(|m| {
            (self.pending.contains(&m.id) || self.superseded.contains(&m.id))
                && m.role == Role::User
                && m.content == message.content
                && (m.timestamp - message.timestamp).abs() <= self.tolerance
        });

        match twin {
            Some(i) => {
                let optimistic = std::mem::replace(&mut self.messages[i], message);
                self.pending.remove(&optimistic.id);
                self.superseded.remove(&optimistic.id);
                debug!("Optimistic {} confirmed as {}", optimistic.id, self.messages[i].id);
                TranscriptChange::Replaced(i)
            }
            None => self.push(message),
        }
    }

    fn on_chunk(&mut self, id: MessageId, content: &str) -> TranscriptChange {
        if self.finalized.contains(&id) {
            trace!("Dropping late chunk for finalized {}", id);
            return TranscriptChange::Ignored;
        }

        match self.position(&id) {
            Some(_) if content.is_empty() => TranscriptChange::Ignored,
            Some(i) => {
                self.messages[i].content.push_str(content);
                TranscriptChange::Updated(i)
            }
            None => self.push(MessageSnapshot {
                id,
                content: content.to_string(),
                role: Role::Assistant,
                timestamp: Utc::now(),
                model: None,
            }),
        }
    }

    fn on_final(&mut self, mut message: MessageSnapshot) -> TranscriptChange {
        // The server answered, so whatever is still pending was received
        self.superseded.extend(self.pending.drain());
        self.finalized.insert(message.id.clone());

        match self.position(&message.id) {
            Some(i) => {
                if message.content.is_empty() {
                    message.content = std::mem::take(&mut self.messages[i].content);
                }
                self.messages[i] = message;
                TranscriptChange::Replaced(i)
            }
            None => self.push(message),
        }
    }

    /// Remove the entry `id`, wherever it sits.
    pub fn remove(&mut self, id: &MessageId) -> TranscriptChange {
        let Some(i) = self.position(id) else {
            return TranscriptChange::Ignored;
        };
        let removed = self.messages.remove(i);
        self.pending.remove(&removed.id);
        self.superseded.remove(&removed.id);
        self.finalized.remove(&removed.id);
        self.errors.remove(&removed.id);
        TranscriptChange::Removed(i)
    }

    /// Drop the error entry `error_id` and resend the user message right
    /// before it. Returns the content to transmit, or `None` when `error_id`
    /// is not an error entry or is not preceded by a user message.
    pub fn retry(&mut self, error_id: &MessageId) -> Option<String> {
        if !self.errors.contains(error_id) {
            return None;
        }
        let i = self.position(error_id)?;
        let previous = self.messages.get(i.checked_sub(1)?)?;
        if previous.role != Role::User {
            return None;
        }
        let content = previous.content.clone();

        self.remove(error_id);
        self.local_send(&content);
        Some(content)
    }
}
