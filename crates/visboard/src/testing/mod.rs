//! Test doubles and helpers shared by unit and integration tests
//!
//! - `ScriptedClient`: a `CompletionClient` that replays canned replies
//! - `memory_board`: an initialized board on in-memory stores
//! - `wait_for_event`: await a store event matching a predicate, with timeout

use crate::ai::{ChunkStream, CompletionClient, CompletionRequest};
use crate::board::BoardStore;
use crate::store::StoreFactory;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use visboard_api::{ApiError, StoreEvent};

/// Completion client that answers from queues of canned replies and records
/// every request it receives.
///
/// `complete` pops the next completion (empty text when none is queued) and
/// `stream` pops the next chunk script (an empty stream when none is
/// queued). A failing client answers every call with a network error.
#[derive(Default)]
pub struct ScriptedClient {
    completions: Mutex<VecDeque<String>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    failing: bool,
}

impl ScriptedClient {
    pub const MODEL: &'static str = "scripted-model";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, reply: impl Into<String>) -> Self {
        if let Ok(mut completions) = self.completions.lock() {
            completions.push_back(reply.into());
        }
        self
    }

    pub fn with_stream<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(chunks.into_iter().map(Into::into).collect());
        }
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: CompletionRequest) -> Result<(), ApiError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if self.failing {
            return Err(ApiError::NetworkError {
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ApiError> {
        self.record(request)?;
        Ok(self
            .completions
            .lock()
            .ok()
            .and_then(|mut c| c.pop_front())
            .unwrap_or_default())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ApiError> {
        self.record(request)?;
        let chunks = self
            .streams
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_default();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        if self.failing {
            return Err(ApiError::NetworkError {
                message: "scripted failure".to_string(),
            });
        }
        Ok(vec![Self::MODEL.to_string()])
    }

    fn model(&self) -> &str {
        Self::MODEL
    }
}

/// An initialized board backed by in-memory stores.
pub async fn memory_board(id: &str) -> Result<BoardStore> {
    let board = BoardStore::open(&StoreFactory::in_memory(), id).await?;
    board.initialize(id).await?;
    Ok(board)
}

/// Wait for the first event accepted by `matches`.
pub async fn wait_for_event<S, F>(
    stream: &mut S,
    timeout_duration: Duration,
    mut matches: F,
) -> Result<StoreEvent>
where
    S: futures::Stream<Item = StoreEvent> + Unpin,
    F: FnMut(&StoreEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            anyhow::bail!("Timeout waiting for store event");
        }
        match timeout(remaining, stream.next()).await {
            Ok(Some(event)) if matches(&event) => return Ok(event),
            Ok(Some(_)) => continue,
            Ok(None) => anyhow::bail!("Event stream closed"),
            Err(_) => anyhow::bail!("Timeout waiting for store event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() -> Result<()> {
        let client = ScriptedClient::new()
            .with_completion("one")
            .with_completion("two")
            .with_stream(["a", "b"]);
        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);

        assert_eq!(client.complete(request.clone()).await?, "one");
        assert_eq!(client.complete(request.clone()).await?, "two");
        assert_eq!(client.complete(request.clone()).await?, "");

        let chunks: Vec<_> = client.stream(request).await?.collect().await;
        assert_eq!(chunks, vec![Ok("a".to_string()), Ok("b".to_string())]);
        assert_eq!(client.requests().len(), 4);
        Ok(())
    }
}
