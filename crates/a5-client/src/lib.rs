//! Client side of the chat cable: a transcript that reconciles optimistic
//! sends with the server's broadcast stream, and the subscription manager
//! that keeps exactly one chat wired to it.

pub mod api;
pub mod connection;
pub mod error;
pub mod subscription;
pub mod transcript;
pub mod transport;

pub use error::{ClientError, TransportError};
pub use subscription::{SubscriptionManager, SubscriptionState};
pub use transcript::{Transcript, TranscriptChange};
pub use transport::Transport;
