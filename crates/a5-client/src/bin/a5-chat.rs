//! Terminal chat over the cable: every stdin line is sent to the chat named
//! by `A5_CHAT_ID`, and the transcript is printed as it changes. `/retry`
//! resends the turn behind the latest error.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use a5_client::api::fetch_conversation;
use a5_client::connection::Connection;
use a5_client::{ClientError, SubscriptionManager, Transcript, TranscriptChange};
use a5_types::events::GatewayFrame;
use a5_types::models::Role;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "a5=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let server_url = std::env::var("A5_SERVER_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let token = std::env::var("A5_TOKEN").context("A5_TOKEN must hold a login token")?;
    let chat_id: Uuid = std::env::var("A5_CHAT_ID")
        .context("A5_CHAT_ID must name a chat")?
        .parse()
        .context("A5_CHAT_ID must be a UUID")?;

    let http = reqwest::Client::new();
    let detail = fetch_conversation(&http, &server_url, &token, chat_id).await?;
    info!("Opened \"{}\" ({} messages)", detail.summary.title, detail.messages.len());

    let (connection, mut frames) = Connection::connect(&server_url, &token).await?;
    let mut manager = SubscriptionManager::new(connection);
    manager.select(chat_id, detail.messages)?;
    print_all(manager.transcript());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    warn!("Cable closed, reconnecting");
                    let (connection, reopened) = reconnect(&server_url, &token).await;
                    frames = reopened;
                    if let Err(e) = manager.reconnect(connection) {
                        warn!("Resubscribe failed: {}", e);
                    }
                    continue;
                };
                let change = manager.handle_frame(frame);
                print_change(manager.transcript(), change);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/retry" {
                    if let Err(e) = retry_last_error(&mut manager) {
                        warn!("Retry not sent: {}", e);
                    }
                    continue;
                }
                match manager.send(&line, None) {
                    Ok(change) => print_change(manager.transcript(), change),
                    Err(ClientError::EmptyMessage) => {}
                    Err(ClientError::Transport(e)) => warn!("Message not sent: {}", e),
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    manager.deselect()?;
    Ok(())
}

/// Keep dialing until the cable is back.
async fn reconnect(server_url: &str, token: &str) -> (Connection, mpsc::UnboundedReceiver<GatewayFrame>) {
    let mut delay = INITIAL_RECONNECT_DELAY;
    loop {
        tokio::time::sleep(delay).await;
        match Connection::connect(server_url, token).await {
            Ok(opened) => {
                info!("Cable reconnected");
                return opened;
            }
            Err(e) => {
                warn!("Reconnect failed: {}, next attempt in {:?}", e, delay);
                delay = std::cmp::min(delay * 2, MAX_RECONNECT_DELAY);
            }
        }
    }
}

fn retry_last_error(manager: &mut SubscriptionManager<Connection>) -> Result<(), ClientError> {
    let Some(error_id) = manager.transcript().last_error().cloned() else {
        println!("(nothing to retry)");
        return Ok(());
    };
    if manager.retry(&error_id)? {
        let transcript = manager.transcript();
        if let Some(message) = transcript.messages().last() {
            println!("[{}] {}", message.role.as_str(), message.content);
        }
    } else {
        println!("(nothing to retry)");
    }
    Ok(())
}

fn print_all(transcript: &Transcript) {
    for message in transcript.messages() {
        println!("[{}] {}", message.role.as_str(), message.content);
    }
}

fn print_change(transcript: &Transcript, change: TranscriptChange) {
    match change {
        TranscriptChange::Appended(i) => {
            let message = &transcript.messages()[i];
            if transcript.is_error(&message.id) {
                println!("\n[error] {} (type /retry)", message.content);
            } else if message.role == Role::Assistant && !message.id.is_optimistic() {
                print!("[assistant] {}", message.content);
                let _ = std::io::stdout().flush();
            } else {
                println!("[{}] {}", message.role.as_str(), message.content);
            }
        }
        // Redraw the growing assistant line in place
        TranscriptChange::Updated(i) => {
            let message = &transcript.messages()[i];
            print!("\r[assistant] {}", message.content);
            let _ = std::io::stdout().flush();
        }
        TranscriptChange::Replaced(i) => {
            let message = &transcript.messages()[i];
            if message.role == Role::Assistant {
                println!("\r[assistant] {}", message.content);
            }
        }
        TranscriptChange::Removed(_) | TranscriptChange::Ignored => {}
    }
}
