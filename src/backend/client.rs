//! Typed chat-completions client.
//!
//! Plays the role of an official client library for OpenAI-style APIs:
//! typed request/response structs, strict chunk decoding and errors rendered
//! the way such libraries render them (`AuthenticationError: Error code: 401 - ...`).
//! Callers that need the error taxonomy classify these messages.

use super::event_stream::LineBuffer;
use crate::http::create_client_with_timeout;
use crate::types::{ChatMessage, Usage};
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`ChatClient`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("{}: Error code: {code} - {body}", status_error_name(.code))]
    Status { code: u16, body: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Invalid response: {0}")]
    Decode(String),
}

fn status_error_name(code: &u16) -> &'static str {
    match *code {
        400 => "BadRequestError",
        401 => "AuthenticationError",
        403 => "PermissionDeniedError",
        404 => "NotFoundError",
        429 => "RateLimitError",
        500..=599 => "InternalServerError",
        _ => "APIStatusError",
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Connection(e.to_string())
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// One entry of `GET /models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Stream of decoded chunks from a streaming completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, ClientError>> + Send>>;

/// Client for one OpenAI-style endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    headers: BTreeMap<String, String>,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            http: create_client_with_timeout(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.headers.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder.bearer_auth(&self.api_key);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn checked(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status { code: status.as_u16(), body })
    }

    /// Non-streaming completion.
    pub async fn create_chat(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self.authorized(self.http.post(&url)).json(request).send().await?;
        let response = Self::checked(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Streaming completion. Ends at `[DONE]` or when the body closes.
    pub async fn create_chat_stream(&self, request: &ChatCompletionRequest) -> Result<ChunkStream, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self.authorized(self.http.post(&url)).json(request).send().await?;
        let response = Self::checked(response).await?;

        let state = DecodeState {
            body: Box::pin(response.bytes_stream()),
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
            done: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, DecodeState::next_chunk)))
    }

    /// List model ids served by the endpoint.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>, ClientError> {
        let url = format!("{}/models", self.base_url);
        let response = self.authorized(self.http.get(&url)).send().await?;
        let response = Self::checked(response).await?;
        let text = response.text().await?;
        let list: ModelList = serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(list.data)
    }
}

struct DecodeState<S> {
    body: S,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    done: bool,
}

impl<S, B> DecodeState<S>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    async fn next_chunk(mut self) -> Option<(Result<ChatCompletionChunk, ClientError>, Self)> {
        loop {
            while let Some(line) = self.ready.pop_front() {
                let Some(payload) = line.trim().strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if payload.is_empty() {
                    continue;
                }
                if payload == "[DONE]" {
                    self.done = true;
                    self.ready.clear();
                    return None;
                }
                let decoded = serde_json::from_str::<ChatCompletionChunk>(payload)
                    .map_err(|e| ClientError::Decode(format!("{}: {}", e, payload)));
                return Some((decoded, self));
            }

            if self.done {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = self.buffer.push(bytes.as_ref());
                    self.ready.extend(lines);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some((Err(ClientError::from(e)), self));
                }
                None => {
                    self.done = true;
                    self.ready.extend(self.buffer.finish());
                }
            }
        }
    }
}
