use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use a5_db::Database;
use a5_types::events::{GatewayCommand, GatewayFrame};

use crate::chat::blocking;
use crate::dispatcher::Dispatcher;
use crate::driver::GenerationDriver;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a cable connection needs from the server.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub driver: GenerationDriver,
}

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: Uuid, username: String) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to cable", username, user_id);

    let Some(welcome) = encode(&GatewayFrame::Welcome { user_id }) else {
        return;
    };
    if sender.send(Message::Text(welcome.into())).await.is_err() {
        return;
    }

    // Subscribe before handling any command so no event published after a
    // confirm_subscription can be missed.
    let mut broadcast_rx = gateway.dispatcher.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayFrame>();

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward chat events + replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let frame = tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    if !send_subscriptions.read().await.contains(&msg.chat_id) {
                        continue;
                    }
                    GatewayFrame::Event { chat_id: msg.chat_id, event: msg.event }
                }
                reply = reply_rx.recv() => match reply {
                    Some(frame) => frame,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let Some(text) = encode(&frame) else { continue };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&gateway, user_id, cmd, &subscriptions, &reply_tx).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from cable", username, user_id);
}

fn encode(frame: &GatewayFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode {:?}: {}", frame, e);
            None
        }
    }
}

/// Whether `chat_id` exists and belongs to `user_id`.
async fn owns_chat(db: &Arc<Database>, user_id: Uuid, chat_id: Uuid) -> bool {
    let lookup = blocking(db, move |db| {
        db.get_chat_for_user(&chat_id.to_string(), &user_id.to_string())
    })
    .await;

    match lookup {
        Ok(chat) => chat.is_some(),
        Err(e) => {
            error!("Chat lookup failed for {}: {:#}", chat_id, e);
            false
        }
    }
}

async fn handle_command(
    gateway: &Gateway,
    user_id: Uuid,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    reply_tx: &mpsc::UnboundedSender<GatewayFrame>,
) {
    match cmd {
        GatewayCommand::Subscribe { chat_id } => {
            let reply = if owns_chat(&gateway.db, user_id, chat_id).await {
                subscriptions.write().await.insert(chat_id);
                debug!("{} subscribed to chat {}", user_id, chat_id);
                GatewayFrame::ConfirmSubscription { chat_id }
            } else {
                warn!("{} rejected from chat {}", user_id, chat_id);
                GatewayFrame::RejectSubscription { chat_id }
            };
            let _ = reply_tx.send(reply);
        }

        GatewayCommand::Unsubscribe { chat_id } => {
            if subscriptions.write().await.remove(&chat_id) {
                debug!("{} unsubscribed from chat {}", user_id, chat_id);
            } else {
                trace!("{} unsubscribed from chat {} it never joined", user_id, chat_id);
            }
        }

        GatewayCommand::SendMessage {
            chat_id,
            content,
            model_id,
        } => {
            let content = content.trim();
            if content.is_empty() {
                warn!("{} sent a blank message to chat {}, ignoring", user_id, chat_id);
                return;
            }
            if !owns_chat(&gateway.db, user_id, chat_id).await {
                warn!("{} sent a message to chat {} it does not own, ignoring", user_id, chat_id);
                return;
            }
            info!("{} asked in chat {}", user_id, chat_id);
            gateway.driver.spawn(chat_id, content.to_string(), model_id);
        }
    }
}
