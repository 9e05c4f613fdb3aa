//! Model-driven flows
//!
//! - `client`: `CompletionClient` seam and the OpenAI-compatible client
//! - `extract`: JSON/XML extraction from model replies
//! - `assistant`: chat, reload, follow-ups and distillation on a board
//! - `cards`: flashcard generation

pub mod assistant;
pub mod busy;
pub mod cards;
pub mod client;
pub mod extract;

pub use assistant::CanvasAssistant;
pub use busy::{BusyFlag, BusyGuard};
pub use cards::CardsAssistant;
pub use client::{ChatMessage, ChunkStream, CompletionClient, CompletionRequest, OpenAiClient};
pub use extract::{extract_first_json, extract_xml_content, xml_tag_text};
