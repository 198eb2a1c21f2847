use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatMessage, ChatRequest, ProviderError, StreamEvent, TokenSource};
use crate::sse::SseDecoder;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Upper bound for a whole generation, body included.
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Streaming client for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenRouter, OpenAI, local servers).
pub struct OpenAiCompatible {
    client: Client,
    config: OpenAiConfig,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

/// What one SSE payload means for the stream.
#[derive(Debug, PartialEq)]
enum Payload {
    Token(String),
    Done,
    Nothing,
}

impl OpenAiCompatible {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// The key to authenticate with: the request's own, else the configured one.
    fn bearer<'a>(&'a self, request: &'a ChatRequest) -> Option<&'a str> {
        request
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| Some(self.config.api_key.as_str()).filter(|key| !key.is_empty()))
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }
}

fn interpret(payload: &str, usage: &mut Option<Usage>) -> Result<Payload, ProviderError> {
    if payload.trim() == "[DONE]" {
        return Ok(Payload::Done);
    }

    let chunk: CompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse completion chunk: {}", e);
            return Ok(Payload::Nothing);
        }
    };

    // OpenRouter reports upstream failures in-band once the stream has started
    if let Some(err) = chunk.error {
        return Err(ProviderError::RequestFailed(err.message));
    }
    if chunk.usage.is_some() {
        *usage = chunk.usage;
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());

    Ok(content.map_or(Payload::Nothing, Payload::Token))
}

#[async_trait]
impl TokenSource for OpenAiCompatible {
    async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let mut req = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = self.bearer(&request) {
            req = req.bearer_auth(key);
        }

        debug!("Streaming {} messages to {}", request.messages.len(), request.model);

        let response = req.send().await.map_err(|e| {
            ProviderError::Network(format!("Failed to connect to {}: {}", self.config.base_url, e))
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth("Invalid API key".to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut usage = None;

        let mut finished = false;
        while !finished {
            let (payloads, end_of_body) = match stream.next().await {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) => return Err(ProviderError::Network(format!("Stream error: {}", e))),
                None => (decoder.finish(), true),
            };

            for payload in payloads {
                match interpret(&payload, &mut usage)? {
                    Payload::Token(token) => {
                        if tx.send(StreamEvent::Token(token)).await.is_err() {
                            return Ok(()); // receiver dropped
                        }
                    }
                    Payload::Done => {
                        finished = true;
                        break;
                    }
                    Payload::Nothing => {}
                }
            }

            finished |= end_of_body;
        }

        let _ = tx
            .send(StreamEvent::Done {
                tokens_in: usage.and_then(|u| u.prompt_tokens),
                tokens_out: usage.and_then(|u| u.completion_tokens),
            })
            .await;
        Ok(())
    }
}
