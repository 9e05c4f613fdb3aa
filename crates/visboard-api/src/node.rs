use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Position / Side
// =============================================================================

/// Canvas coordinates of a node's centre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Placement preference of a knowledge node relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
    Top,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Top => "top",
        }
    }

    /// Handle on the knowledge node that faces its anchor.
    ///
    /// A left knowledge node is entered from its right edge; everything else
    /// is entered from the left.
    pub fn target_handle(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right | Side::Top => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            "top" => Ok(Side::Top),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Author of a chat message, mirroring the chat-completions roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Function,
    Developer,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Function => "function",
            Role::Developer => "developer",
            Role::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "function" => Ok(Role::Function),
            "developer" => Ok(Role::Developer),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One entry of a branch transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Option<String>,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_per_second: Option<f64>,
    /// Suggested follow-up questions generated after an assistant reply
    #[serde(default)]
    pub followups: Vec<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            role,
            content: Some(content.into()),
            timestamp,
            took_seconds: None,
            token_per_second: None,
            followups: Vec::new(),
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Discriminant of [`NodeData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Branch,
    Knowledge,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Branch => "branch",
            NodeKind::Knowledge => "knowledge",
        }
    }
}

/// A chat thread anchoring a conversation and its visual subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchData {
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
}

/// A distilled annotation attached to a branch or to another knowledge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeData {
    pub branch_id: String,
    pub title: Option<String>,
    pub content: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    #[serde(default)]
    pub took_seconds: f64,
    #[serde(default)]
    pub token_per_second: f64,
    /// Back-reference to the knowledge node this one was distilled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub side: Side,
}

/// Node payload, discriminated by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeData {
    Branch(BranchData),
    Knowledge(KnowledgeData),
}

/// A canvas node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub data: NodeData,
}

impl Node {
    pub fn branch(id: impl Into<String>, data: BranchData) -> Self {
        Self {
            id: id.into(),
            position: Position::ORIGIN,
            width: None,
            height: None,
            data: NodeData::Branch(data),
        }
    }

    pub fn knowledge(id: impl Into<String>, data: KnowledgeData) -> Self {
        Self {
            id: id.into(),
            position: Position::ORIGIN,
            width: None,
            height: None,
            data: NodeData::Knowledge(data),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Branch(_) => NodeKind::Branch,
            NodeData::Knowledge(_) => NodeKind::Knowledge,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.data, NodeData::Branch(_))
    }

    pub fn as_branch(&self) -> Option<&BranchData> {
        match &self.data {
            NodeData::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_knowledge(&self) -> Option<&KnowledgeData> {
        match &self.data {
            NodeData::Knowledge(k) => Some(k),
            _ => None,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

// =============================================================================
// Edges
// =============================================================================

/// Visual connector between two nodes. Carries no ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(rename = "type", default = "default_edge_kind")]
    pub kind: String,
}

fn default_edge_kind() -> String {
    "default".to_string()
}

impl Edge {
    /// Edge from an anchor to a knowledge node placed on `side`.
    pub fn to_side(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        side: Side,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: Some(side.as_str().to_string()),
            target_handle: Some(side.target_handle().as_str().to_string()),
            kind: default_edge_kind(),
        }
    }
}
