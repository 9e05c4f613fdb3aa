//! Chat and distillation flows that drive a board from model output.
//!
//! Each flow works on the board's active branch. A flow that finds nothing
//! to work on (no branch, unknown message, flow already running) returns
//! `Ok(None)` without touching the board.

use super::busy::BusyFlag;
use super::client::{ChatMessage, CompletionClient, CompletionRequest};
use super::extract::{extract_string_list, extract_xml_content, xml_tag_text};
use crate::board::{BoardStore, make_id};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use visboard_api::{ApiError, KnowledgeData, Message, Node, NodeData, Role, Side};

pub const SYSTEM_PROMPT: &str = "You are a friendly AI assistant that helps people find information.\n you always answer in markdown format.";

/// Reply length cap for chat turns.
pub const CHAT_MAX_TOKENS: u32 = 300;

fn followups_prompt(content: &str) -> String {
    format!(
        "<AssistantMessage>:\n{content}\n</AssistantMessage>\n---\n\n\
         Please generate 4 very short followup questions based on the assistant message ( maximum 4 words each),\n\
         the followups should questions user can ask from ai related to that message.\n\
         if the assistant message was casual/regular talk and not much information on it, you have to return an empty array.\n\n\
         ---\nReturn in this JSON array format, no extra talk:\n[\n   \"...\",\n   \"...\"\n]\n"
    )
}

fn distill_message_prompt(content: &str) -> String {
    format!(
        "<AssistantMessage>\n{content}\n</AssistantMessage>\n---\n\
         - the response should be correct xml format with start and closing tags, without extra talk.\n\
         - title should be short and to the point.\n\
         - content should be normal short text in simple format.\n\n\
         Please Distill the knowledge from the assistant message into in this xml format, with out any extra talk:\n\
         <knowledge>\n  <title>--</title>\n  <content>--</content>\n</knowledge>\n"
    )
}

fn distill_knowledge_prompt(content: &str, kind: &str) -> String {
    format!(
        "Message:\n{content}\n\n---\n\n\
         Based on the message above, please distill the {kind} from the message.\n\
         raw text, maximum 4 paragraphs, no extra talk:\n"
    )
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Elapsed seconds and chunks per second for a finished stream.
fn stream_stats(started: Instant, chunks: usize) -> (f64, f64) {
    let took = started.elapsed().as_secs_f64();
    let rate = if took > 0.0 { chunks as f64 / took } else { 0.0 };
    (took, rate)
}

pub struct CanvasAssistant {
    board: BoardStore,
    client: Arc<dyn CompletionClient>,
    receiving: BusyFlag,
    followups: BusyFlag,
    distilling: BusyFlag,
}

impl CanvasAssistant {
    pub fn new(board: BoardStore, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            board,
            client,
            receiving: BusyFlag::new(),
            followups: BusyFlag::new(),
            distilling: BusyFlag::new(),
        }
    }

    pub fn board(&self) -> &BoardStore {
        &self.board
    }

    pub fn is_receiving_message(&self) -> bool {
        self.receiving.is_busy()
    }

    pub fn is_generating_followups(&self) -> bool {
        self.followups.is_busy()
    }

    pub fn is_distilling(&self) -> bool {
        self.distilling.is_busy()
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        self.client.list_models().await
    }

    async fn active_branch(&self) -> Result<Option<(String, Vec<Message>)>, ApiError> {
        Ok(self.board.active_branch().await?.and_then(|node| {
            let Node { id, data, .. } = node;
            match data {
                NodeData::Branch(branch) => Some((id, branch.messages)),
                _ => None,
            }
        }))
    }

    fn chat_request(history: &[Message]) -> CompletionRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(history.iter().map(ChatMessage::from));
        CompletionRequest::new(messages).with_max_tokens(CHAT_MAX_TOKENS)
    }

    /// Append the user's message, stream the reply into a new assistant
    /// message and then ask for follow-up questions.
    ///
    /// Returns the id of the assistant message.
    pub async fn send_text_message(&self, text: &str) -> Result<Option<String>, ApiError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let Some(guard) = self.receiving.try_acquire() else {
            debug!("Ignoring message: a reply is still streaming");
            return Ok(None);
        };
        let Some((branch_id, mut history)) = self.active_branch().await? else {
            return Ok(None);
        };

        let user = Message::new(make_id(), Role::User, text, now_ms());
        self.board.push_message(&branch_id, &user).await?;
        history.push(user);

        let reply_id = make_id();
        let chunks = self
            .stream_into(Self::chat_request(&history), |chunk, first| {
                let board = self.board.clone();
                let branch_id = branch_id.clone();
                let reply_id = reply_id.clone();
                async move {
                    if first {
                        let reply = Message::new(reply_id, Role::Assistant, chunk, now_ms());
                        board.push_message(&branch_id, &reply).await
                    } else {
                        board.append_to_message(&branch_id, &reply_id, &chunk).await
                    }
                }
            })
            .await?;
        drop(guard);

        if chunks == 0 {
            warn!("Model returned an empty reply");
            return Ok(None);
        }
        self.followups_after_reply(&reply_id).await;
        Ok(Some(reply_id))
    }

    /// Regenerate an assistant message from the conversation before it.
    pub async fn reload_message(&self, message_id: &str) -> Result<Option<String>, ApiError> {
        let Some(guard) = self.receiving.try_acquire() else {
            return Ok(None);
        };
        let Some((branch_id, history)) = self.active_branch().await? else {
            return Ok(None);
        };
        let Some(index) = history.iter().position(|m| m.id == message_id) else {
            return Ok(None);
        };
        if history[index].role != Role::Assistant {
            return Ok(None);
        }

        // the old content is cleared only once the new reply starts arriving
        let request = Self::chat_request(&history[..index]);
        self.stream_into(request, |chunk, first| {
            let board = self.board.clone();
            let branch_id = branch_id.clone();
            async move {
                if first {
                    board.reset_message(&branch_id, message_id).await?;
                }
                board.append_to_message(&branch_id, message_id, &chunk).await
            }
        })
        .await?;
        drop(guard);

        self.followups_after_reply(message_id).await;
        Ok(Some(message_id.to_string()))
    }

    async fn followups_after_reply(&self, message_id: &str) {
        if let Err(e) = self.generate_followups(message_id).await {
            warn!("No follow-ups for message '{}': {}", message_id, e);
        }
    }

    /// Ask the model for short follow-up questions about a message.
    ///
    /// Malformed output leaves the message unchanged.
    pub async fn generate_followups(&self, message_id: &str) -> Result<Option<Vec<String>>, ApiError> {
        let Some(_guard) = self.followups.try_acquire() else {
            return Ok(None);
        };
        let Some((branch_id, history)) = self.active_branch().await? else {
            return Ok(None);
        };
        let Some(message) = history.iter().find(|m| m.id == message_id) else {
            return Ok(None);
        };

        let request = CompletionRequest::new(vec![ChatMessage::user(followups_prompt(
            message.content_str(),
        ))]);
        let reply = self.client.complete(request).await.inspect_err(|e| {
            warn!("Follow-up generation failed: {}", e);
        })?;

        match extract_string_list(&reply) {
            Some(followups) if !followups.is_empty() => {
                self.board
                    .set_followups(&branch_id, message_id, &followups)
                    .await?;
                Ok(Some(followups))
            }
            Some(_) => Ok(None),
            None => {
                warn!("Follow-up reply was not a JSON array");
                Ok(None)
            }
        }
    }

    /// Distill the last message of the active branch into a knowledge node
    /// placed on `side`.
    pub async fn distill_message(&self, side: Side) -> Result<Option<String>, ApiError> {
        let Some(_guard) = self.distilling.try_acquire() else {
            return Ok(None);
        };
        let Some((branch_id, history)) = self.active_branch().await? else {
            return Ok(None);
        };
        let Some(message) = history.last() else {
            return Ok(None);
        };

        let started = Instant::now();
        let request = CompletionRequest::new(vec![ChatMessage::user(distill_message_prompt(
            message.content_str(),
        ))]);
        let reply = self.client.complete(request).await.inspect_err(|e| {
            warn!("Distillation failed: {}", e);
        })?;

        let parsed = extract_xml_content(&reply, "knowledge").and_then(|fragment| {
            Some((
                xml_tag_text(&fragment, "title")?,
                xml_tag_text(&fragment, "content")?,
            ))
        });
        let Some((title, content)) = parsed else {
            warn!("Distillation reply had no <knowledge> title and content");
            return Ok(None);
        };

        let (took_seconds, _) = stream_stats(started, 1);
        let id = self
            .board
            .add_knowledge(KnowledgeData {
                branch_id,
                title: Some(title),
                content,
                timestamp: now_ms(),
                took_seconds,
                token_per_second: 0.0,
                parent_id: None,
                side,
            })
            .await?;
        info!("Distilled message '{}' into knowledge '{}'", message.id, id);
        Ok(Some(id))
    }

    /// Stream a `kind` distillation (summary, key points, ...) of a knowledge
    /// node into a new child node.
    pub async fn distill_knowledge(&self, knowledge_id: &str, kind: &str) -> Result<Option<String>, ApiError> {
        let Some(_guard) = self.distilling.try_acquire() else {
            return Ok(None);
        };
        if self.active_branch().await?.is_none() {
            return Ok(None);
        }
        let snapshot = self.board.snapshot().await?;
        let Some(parent) = snapshot.knowledge(knowledge_id).and_then(|n| n.as_knowledge()) else {
            return Ok(None);
        };

        let child_id = self
            .board
            .add_knowledge(KnowledgeData {
                branch_id: parent.branch_id.clone(),
                title: Some(kind.to_string()),
                content: String::new(),
                timestamp: now_ms(),
                took_seconds: 0.0,
                token_per_second: 0.0,
                parent_id: Some(knowledge_id.to_string()),
                side: parent.side,
            })
            .await?;

        let started = Instant::now();
        let request = CompletionRequest::new(vec![ChatMessage::user(distill_knowledge_prompt(
            &parent.content,
            kind,
        ))]);
        let chunks = self
            .stream_into(request, |chunk, _| {
                let board = self.board.clone();
                let child_id = child_id.clone();
                async move { board.append_knowledge_content(&child_id, &chunk).await }
            })
            .await?;

        let (took, rate) = stream_stats(started, chunks);
        self.board.set_knowledge_stats(&child_id, took, rate).await?;
        debug!("Distilled {} of '{}' in {:.1}s", kind, knowledge_id, took);
        Ok(Some(child_id))
    }

    /// Feed every non-empty chunk of a streamed completion to `apply`, one
    /// store transaction per chunk. Returns the number of chunks applied.
    async fn stream_into<F, Fut>(&self, request: CompletionRequest, mut apply: F) -> Result<usize, ApiError>
    where
        F: FnMut(String, bool) -> Fut,
        Fut: std::future::Future<Output = Result<(), ApiError>>,
    {
        let mut stream = self.client.stream(request).await.inspect_err(|e| {
            warn!("Completion request failed: {}", e);
        })?;

        let mut count = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.inspect_err(|e| warn!("Completion stream broke off: {}", e))?;
            if chunk.is_empty() {
                continue;
            }
            apply(chunk, count == 0).await?;
            count += 1;
        }
        Ok(count)
    }
}
