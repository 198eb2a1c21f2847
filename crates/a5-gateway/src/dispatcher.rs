use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use a5_types::events::ChannelEvent;

/// Capacity of the shared broadcast buffer. Receivers that fall further
/// behind than this skip the lost events.
const BROADCAST_CAPACITY: usize = 1024;

/// An event scoped to one chat, as it travels through the dispatcher.
#[derive(Debug, Clone)]
pub struct ChatBroadcast {
    pub chat_id: Uuid,
    pub event: ChannelEvent,
}

/// Fans chat events out to every connected client.
///
/// Every connection receives every broadcast and drops those for chats it
/// is not subscribed to.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<ChatBroadcast>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to chat events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatBroadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all subscribers of `chat_id`.
    pub fn broadcast(&self, chat_id: Uuid, event: ChannelEvent) {
        // No receivers is fine: nobody is watching this chat right now
        let _ = self.inner.broadcast_tx.send(ChatBroadcast { chat_id, event });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
