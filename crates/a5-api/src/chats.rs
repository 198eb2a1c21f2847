use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use a5_db::models::{ChatRow, parse_timestamp};
use a5_types::api::{Claims, ConversationDetail, ConversationSummary, CreateChatRequest};

use crate::{AppState, with_db};

const TITLE_MAX_CHARS: usize = 40;
const ELLIPSIS: &str = "...";

/// Shorten `text` to at most `TITLE_MAX_CHARS` characters, ellipsis included.
fn truncate_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    let keep = TITLE_MAX_CHARS - ELLIPSIS.len();
    let mut title: String = text.chars().take(keep).collect();
    title.push_str(ELLIPSIS);
    title
}

/// Display title: the explicit title, else the opening message, else a
/// placeholder naming the chat.
fn display_title(chat: &ChatRow) -> String {
    if let Some(title) = chat.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.to_string();
    }
    match chat.first_message.as_deref() {
        Some(first) => truncate_title(first),
        None => format!("Chat {}", chat.id),
    }
}

fn summarize(chat: &ChatRow) -> Result<ConversationSummary, StatusCode> {
    let id: Uuid = chat.id.parse().map_err(|_| {
        warn!("Chat with non-uuid id {}", chat.id);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(ConversationSummary {
        id,
        title: display_title(chat),
        timestamp: parse_timestamp(&chat.updated_at),
        message_count: chat.message_count,
        has_new_activity: false,
    })
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let chats = with_db(&state, move |db| db.list_chats(&uid)).await?;

    let summaries = chats
        .iter()
        .map(summarize)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(summaries))
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<CreateChatRequest>>,
) -> Result<impl IntoResponse, StatusCode> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let chat_id = Uuid::new_v4();
    let uid = claims.sub.to_string();
    let model_id = req.model_id.filter(|m| !m.trim().is_empty());

    let chat = with_db(&state, move |db| {
        db.create_chat(&chat_id.to_string(), &uid, model_id.as_deref())
    })
    .await?;

    info!("{} created chat {}", claims.username, chat_id);
    Ok((StatusCode::CREATED, Json(summarize(&chat)?)))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let cid = chat_id.to_string();
    let uid = claims.sub.to_string();
    let (chat, messages) = with_db(&state, move |db| {
        let Some(chat) = db.get_chat_for_user(&cid, &uid)? else {
            return Ok(None);
        };
        let messages = db.get_messages(&cid)?;
        Ok(Some((chat, messages)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ConversationDetail {
        summary: summarize(&chat)?,
        messages: messages.iter().map(|m| m.to_snapshot()).collect(),
    }))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let cid = chat_id.to_string();
    let uid = claims.sub.to_string();
    let deleted = with_db(&state, move |db| db.delete_chat(&cid, &uid)).await?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    info!("{} deleted chat {}", claims.username, chat_id);
    Ok(StatusCode::NO_CONTENT)
}
