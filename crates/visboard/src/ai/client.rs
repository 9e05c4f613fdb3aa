//! OpenAI-compatible chat completion client
//!
//! `CompletionClient` is the seam the assistants depend on; `OpenAiClient`
//! talks to any server exposing `/chat/completions` and `/models`.

use crate::config::Settings;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};
use visboard_api::{ApiError, Message, Role};

pub type ChunkStream = BoxStream<'static, Result<String, ApiError>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Full completion text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ApiError>;

    /// Completion text as it is generated, one content delta per item.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError>;

    /// Ids of the models the endpoint serves.
    async fn list_models(&self) -> Result<Vec<String>, ApiError>;

    /// Model name recorded on generated content.
    fn model(&self) -> &str;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(endpoint: &str, api_key: Option<&str>, model: &str) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                ApiError::InvalidOperation {
                    message: "API key contains characters not allowed in a header".to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        Self::new(&settings.endpoint, settings.api_key.as_deref(), &settings.model)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn post(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ApiError> {
        let url = self.url("chat/completions");
        debug!("POST {} ({} messages, stream: {})", url, request.messages.len(), stream);
        let response = self
            .client
            .post(&url)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| network_error(e, &url))?;
        check_status(response, &url).await
    }
}

fn network_error(e: reqwest::Error, url: &str) -> ApiError {
    let message = if e.is_timeout() {
        format!("request to {url} timed out")
    } else if e.is_connect() {
        format!("could not connect to {url}: {e}")
    } else if e.is_decode() {
        format!("unexpected response format from {url}: {e}")
    } else {
        format!("request to {url} failed: {e}")
    };
    ApiError::NetworkError { message }
}

async fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut text = response.text().await.unwrap_or_default();
    if text.len() > 500 {
        let cut = (0..=500).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
        text.truncate(cut);
        text.push_str("... (truncated)");
    }
    Err(ApiError::NetworkError {
        message: format!("HTTP {} from {}: {}", status.as_u16(), url, text),
    })
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ApiError> {
        let url = self.url("chat/completions");
        let value: Value = self
            .post(&request, false)
            .await?
            .json()
            .await
            .map_err(|e| network_error(e, &url))?;
        Ok(value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError> {
        let url = self.url("chat/completions");
        let response = self.post(&request, true).await?;

        // `None` marks the end of the body so a trailing unterminated line is decoded
        let chunks = response
            .bytes_stream()
            .map(Some)
            .chain(stream::once(futures::future::ready(None)))
            .scan(SseDecoder::default(), move |decoder, bytes| {
                if decoder.is_finished() {
                    return futures::future::ready(None);
                }
                let items: Vec<Result<String, ApiError>> = match bytes {
                    Some(Ok(bytes)) => decoder.push(&bytes).into_iter().map(Ok).collect(),
                    Some(Err(e)) => {
                        decoder.finish();
                        vec![Err(network_error(e, &url))]
                    }
                    None => decoder.finish_pending().into_iter().map(Ok).collect(),
                };
                futures::future::ready(Some(items))
            })
            .flat_map(stream::iter)
            .boxed();
        Ok(chunks)
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let url = self.url("models");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| network_error(e, &url))?;
        let value: Value = check_status(response, &url)
            .await?
            .json()
            .await
            .map_err(|e| network_error(e, &url))?;

        Ok(value["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Incremental decoder for `text/event-stream` completion responses.
///
/// Yields the `choices[0].delta.content` of every `data:` line and stops at
/// the `[DONE]` marker.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Feed raw bytes; returns the content deltas completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.decode_line(&line, &mut deltas);
        }
        deltas
    }

    /// End of input: decode a last line that had no trailing newline.
    pub fn finish_pending(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        let mut deltas = Vec::new();
        self.decode_line(&line, &mut deltas);
        self.finished = true;
        deltas
    }

    fn decode_line(&mut self, line: &[u8], deltas: &mut Vec<String>) {
        if self.finished {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.finished = true;
            return;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(value) => {
                if let Some(delta) = value["choices"][0]["delta"]["content"].as_str()
                    && !delta.is_empty()
                {
                    deltas.push(delta.to_string());
                }
            }
            Err(e) => warn!("Ignoring malformed stream event: {}", e),
        }
    }
}
