use reqwest::Client;
use uuid::Uuid;

use a5_types::api::ConversationDetail;

use crate::error::ClientError;

/// Load a conversation and its history from the read API.
pub async fn fetch_conversation(
    client: &Client,
    server_url: &str,
    token: &str,
    chat_id: Uuid,
) -> Result<ConversationDetail, ClientError> {
    let url = format!("{}/api/v1/chats/{}", server_url.trim_end_matches('/'), chat_id);
    let detail = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .json::<ConversationDetail>()
        .await?;
    Ok(detail)
}
