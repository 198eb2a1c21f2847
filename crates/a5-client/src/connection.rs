use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use a5_types::events::{GatewayCommand, GatewayFrame};

use crate::error::TransportError;
use crate::transport::Transport;

/// Cable endpoint for an HTTP(S) server base URL.
pub fn cable_url(server_url: &str, token: &str) -> String {
    format!(
        "{}/cable?token={}",
        server_url
            .trim_end_matches('/')
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1),
        token
    )
}

/// A live cable WebSocket. Commands are queued to a writer task; frames
/// arrive on the receiver returned by [`Connection::connect`], which closes
/// when the socket does.
pub struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub async fn connect(
        server_url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayFrame>), TransportError> {
        let url = cable_url(server_url, token);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Socket(format!("WS connect failed: {}", e)))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    warn!("WS send error: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WS receive error: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<GatewayFrame>(&text) {
                    Ok(frame) => {
                        if frames_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Unreadable frame: {} -- raw: {}", e, text.as_str()),
                }
            }
            debug!("Cable reader finished");
        });

        Ok((Self { outbound }, frames_rx))
    }
}

impl Transport for Connection {
    fn send(&self, command: GatewayCommand) -> Result<(), TransportError> {
        let text = serde_json::to_string(&command)?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cable_url_swaps_scheme() {
        assert_eq!(
            cable_url("http://localhost:3000/", "abc"),
            "ws://localhost:3000/cable?token=abc"
        );
        assert_eq!(
            cable_url("https://chat.example.com", "abc"),
            "wss://chat.example.com/cable?token=abc"
        );
    }
}
