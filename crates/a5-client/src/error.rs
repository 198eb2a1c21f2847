use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    Socket(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("No conversation selected")]
    NoConversation,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
