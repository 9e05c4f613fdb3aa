//! Board document layout
//!
//! ```text
//! config      Map  { id, title, version, active_branch, is_initialized }
//! branches    Map  branch_id -> Map { id, title, parent_branch_id, bg_color,
//!                                     order, x, y, width, height,
//!                                     messages: List<Map> }
//! knowledges  Map  node_id -> Map { id, branch_id, title, content: Text, ... }
//! edges       List<Map { id, source, target, source_handle, target_handle, type }>
//! cardsPacks  List<Map { id, title, description, cards: json, ... }>
//! ```
//!
//! Message and knowledge content are Loro text containers so that streamed
//! chunks from different replicas merge character-wise.

use crate::store::loro_ext::{insert_opt_f64, insert_opt_str};
use crate::store::{LoroListExt, LoroMapExt, Schema};
use anyhow::Result;
use loro::{Container, LoroDoc, LoroList, LoroMap, LoroText, LoroValue, ValueOrContainer};
use tracing::warn;
use visboard_api::{
    ApiError, BoardConfig, BranchData, Card, CardPack, CardTheme, Edge, KnowledgeData, Message,
    Node, Position, Role, Side,
};

pub const CONFIG: &str = "config";
pub const BRANCHES: &str = "branches";
pub const KNOWLEDGES: &str = "knowledges";
pub const EDGES: &str = "edges";
pub const CARD_PACKS: &str = "cardsPacks";

const MESSAGES: &str = "messages";
const CONTENT: &str = "content";
const ORDER: &str = "order";

pub struct BoardSchema;

/// Detached, typed copy of one board document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub config: BoardConfig,
    /// Branch nodes in creation order
    pub branches: Vec<Node>,
    /// Knowledge nodes in creation order
    pub knowledges: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Card packs in the order they were saved
    pub card_packs: Vec<CardPack>,
}

impl BoardSnapshot {
    /// Branches first, then knowledge nodes.
    pub fn nodes(&self) -> Vec<Node> {
        self.branches
            .iter()
            .chain(self.knowledges.iter())
            .cloned()
            .collect()
    }

    pub fn branch(&self, id: &str) -> Option<&Node> {
        self.branches.iter().find(|n| n.id == id)
    }

    pub fn knowledge(&self, id: &str) -> Option<&Node> {
        self.knowledges.iter().find(|n| n.id == id)
    }

    pub fn active_branch(&self) -> Option<&Node> {
        self.branch(&self.config.active_branch)
    }
}

impl Schema for BoardSchema {
    const ROOM_PREFIX: &'static str = "board-";
    type Snapshot = BoardSnapshot;

    fn initialize(doc: &LoroDoc) -> Result<()> {
        doc.get_map(CONFIG);
        doc.get_map(BRANCHES);
        doc.get_map(KNOWLEDGES);
        doc.get_list(EDGES);
        doc.get_list(CARD_PACKS);
        Ok(())
    }

    fn project(doc: &LoroDoc) -> Result<BoardSnapshot> {
        Ok(BoardSnapshot {
            config: read_config(&doc.get_map(CONFIG)),
            branches: collect_ordered(&doc.get_map(BRANCHES), read_branch),
            knowledges: collect_ordered(&doc.get_map(KNOWLEDGES), read_knowledge),
            edges: doc.get_list(EDGES).collect_map(|v| as_map(v).and_then(|m| read_edge(&m))),
            card_packs: doc
                .get_list(CARD_PACKS)
                .collect_map(|v| as_map(v).and_then(|m| read_card_pack(&m))),
        })
    }
}

pub(crate) fn as_map(value: ValueOrContainer) -> Option<LoroMap> {
    match value {
        ValueOrContainer::Container(Container::Map(m)) => Some(m),
        _ => None,
    }
}

/// Collect the entries of a keyed node map, sorted by insertion order.
fn collect_ordered<F>(map: &LoroMap, read: F) -> Vec<Node>
where
    F: Fn(&str, &LoroMap) -> Option<Node>,
{
    let mut entries = Vec::new();
    map.for_each(|key, value| {
        if let Some(node_map) = as_map(value) {
            match read(key, &node_map) {
                Some(node) => entries.push((node_map.get_i64(ORDER).unwrap_or(0), node)),
                None => warn!("Skipping malformed node '{}'", key),
            }
        }
    });
    entries.sort_by(|(a, na), (b, nb)| a.cmp(b).then_with(|| na.id.cmp(&nb.id)));
    entries.into_iter().map(|(_, node)| node).collect()
}

/// Next insertion index for a keyed node map.
pub(crate) fn next_order(map: &LoroMap) -> i64 {
    let mut max = -1;
    map.for_each(|_, value| {
        if let Some(m) = as_map(value) {
            max = max.max(m.get_i64(ORDER).unwrap_or(0));
        }
    });
    max + 1
}

// -- config ------------------------------------------------------------------

pub(crate) fn read_config(map: &LoroMap) -> BoardConfig {
    BoardConfig {
        id: map.get_string("id").unwrap_or_default(),
        title: map.get_string("title").unwrap_or_default(),
        version: map.get_string("version").unwrap_or_default(),
        active_branch: map.get_string("active_branch").unwrap_or_default(),
        is_initialized: map.get_bool("is_initialized").unwrap_or(false),
    }
}

pub(crate) fn write_config(map: &LoroMap, config: &BoardConfig) -> Result<()> {
    map.insert("id", config.id.as_str())?;
    map.insert("title", config.title.as_str())?;
    map.insert("version", config.version.as_str())?;
    map.insert("active_branch", config.active_branch.as_str())?;
    map.insert("is_initialized", config.is_initialized)?;
    Ok(())
}

// -- nodes -------------------------------------------------------------------

fn read_geometry(map: &LoroMap, node: &mut Node) {
    node.position = Position::new(
        map.get_f64("x").unwrap_or(0.0),
        map.get_f64("y").unwrap_or(0.0),
    );
    node.width = map.get_f64("width");
    node.height = map.get_f64("height");
}

pub(crate) fn write_position(map: &LoroMap, position: Position) -> Result<()> {
    map.insert("x", position.x)?;
    map.insert("y", position.y)?;
    Ok(())
}

pub(crate) fn write_size(map: &LoroMap, width: Option<f64>, height: Option<f64>) -> Result<()> {
    insert_opt_f64(map, "width", width)?;
    insert_opt_f64(map, "height", height)?;
    Ok(())
}

fn read_branch(key: &str, map: &LoroMap) -> Option<Node> {
    let messages = map
        .get_list_container(MESSAGES)
        .map(|list| list.collect_map(|v| as_map(v).and_then(|m| read_message(&m))))
        .unwrap_or_default();

    let data = BranchData {
        title: map.get_string("title").unwrap_or_default(),
        messages,
        parent_branch_id: map.get_string("parent_branch_id"),
        bg_color: map.get_string("bg_color"),
    };
    let mut node = Node::branch(map.get_string("id").unwrap_or_else(|| key.to_string()), data);
    read_geometry(map, &mut node);
    Some(node)
}

/// Write a new branch entry (messages included) under `branches[node.id]`.
pub(crate) fn insert_branch(branches: &LoroMap, node: &Node, data: &BranchData) -> Result<LoroMap> {
    let order = next_order(branches);
    let map = branches.insert_container(&node.id, LoroMap::new())?;
    map.insert("id", node.id.as_str())?;
    map.insert("title", data.title.as_str())?;
    insert_opt_str(&map, "parent_branch_id", data.parent_branch_id.as_deref())?;
    insert_opt_str(&map, "bg_color", data.bg_color.as_deref())?;
    map.insert(ORDER, order)?;
    write_position(&map, node.position)?;
    write_size(&map, node.width, node.height)?;

    let messages = map.insert_container(MESSAGES, LoroList::new())?;
    for message in &data.messages {
        push_message(&messages, message)?;
    }
    Ok(map)
}

fn read_knowledge(key: &str, map: &LoroMap) -> Option<Node> {
    let side = match map.get_string("side").map(|s| s.parse::<Side>()) {
        Some(Ok(side)) => side,
        Some(Err(e)) => {
            warn!("Knowledge '{}': {}", key, e);
            return None;
        }
        None => Side::Left,
    };

    let data = KnowledgeData {
        branch_id: map.get_string("branch_id")?,
        title: map.get_string("title"),
        content: read_text(map, CONTENT).unwrap_or_default(),
        timestamp: map.get_i64("timestamp").unwrap_or(0),
        took_seconds: map.get_f64("took_seconds").unwrap_or(0.0),
        token_per_second: map.get_f64("token_per_second").unwrap_or(0.0),
        parent_id: map.get_string("parent_id"),
        side,
    };
    let mut node = Node::knowledge(map.get_string("id").unwrap_or_else(|| key.to_string()), data);
    read_geometry(map, &mut node);
    Some(node)
}

pub(crate) fn insert_knowledge(
    knowledges: &LoroMap,
    node: &Node,
    data: &KnowledgeData,
) -> Result<LoroMap> {
    let order = next_order(knowledges);
    let map = knowledges.insert_container(&node.id, LoroMap::new())?;
    map.insert("id", node.id.as_str())?;
    map.insert("branch_id", data.branch_id.as_str())?;
    insert_opt_str(&map, "title", data.title.as_deref())?;
    let content = map.insert_container(CONTENT, LoroText::new())?;
    if !data.content.is_empty() {
        content.insert(0, &data.content)?;
    }
    map.insert("timestamp", data.timestamp)?;
    map.insert("took_seconds", data.took_seconds)?;
    map.insert("token_per_second", data.token_per_second)?;
    insert_opt_str(&map, "parent_id", data.parent_id.as_deref())?;
    map.insert("side", data.side.as_str())?;
    map.insert(ORDER, order)?;
    write_position(&map, node.position)?;
    write_size(&map, node.width, node.height)?;
    Ok(map)
}

// -- messages ----------------------------------------------------------------

/// Text of a text container, falling back to a plain string value.
fn read_text(map: &LoroMap, key: &str) -> Option<String> {
    map.get_text_container(key)
        .map(|t| t.to_string())
        .or_else(|| map.get_string(key))
}

pub(crate) fn read_message(map: &LoroMap) -> Option<Message> {
    let id = map.get_string("id")?;
    let role = match map.get_string("role")?.parse::<Role>() {
        Ok(role) => role,
        Err(e) => {
            warn!("Message '{}': {}", id, e);
            return None;
        }
    };

    Some(Message {
        id,
        role,
        content: read_text(map, CONTENT),
        timestamp: map.get_i64("timestamp").unwrap_or(0),
        took_seconds: map.get_f64("took_seconds"),
        token_per_second: map.get_f64("token_per_second"),
        followups: map.get_json("followups").unwrap_or_default(),
    })
}

fn write_message(map: &LoroMap, message: &Message) -> Result<()> {
    map.insert("id", message.id.as_str())?;
    map.insert("role", message.role.as_str())?;
    match &message.content {
        Some(content) => {
            let text = map.insert_container(CONTENT, LoroText::new())?;
            if !content.is_empty() {
                text.insert(0, content)?;
            }
        }
        None => map.insert(CONTENT, LoroValue::Null)?,
    }
    map.insert("timestamp", message.timestamp)?;
    insert_opt_f64(map, "took_seconds", message.took_seconds)?;
    insert_opt_f64(map, "token_per_second", message.token_per_second)?;
    write_followups(map, &message.followups)?;
    Ok(())
}

pub(crate) fn push_message(list: &LoroList, message: &Message) -> Result<()> {
    let map = list.push_container(LoroMap::new())?;
    write_message(&map, message)
}

pub(crate) fn write_followups(map: &LoroMap, followups: &[String]) -> Result<()> {
    map.insert("followups", serde_json::to_string(followups)?)?;
    Ok(())
}

/// Text container holding a message's content, created when the message
/// had no content yet.
pub(crate) fn message_text(map: &LoroMap) -> Result<LoroText> {
    match map.get_text_container(CONTENT) {
        Some(text) => Ok(text),
        None => {
            let previous = map.get_string(CONTENT).unwrap_or_default();
            let text = map.insert_container(CONTENT, LoroText::new())?;
            if !previous.is_empty() {
                text.insert(0, &previous)?;
            }
            Ok(text)
        }
    }
}

pub(crate) fn knowledge_text(map: &LoroMap) -> Result<LoroText> {
    message_text(map)
}

// -- edges -------------------------------------------------------------------

pub(crate) fn read_edge(map: &LoroMap) -> Option<Edge> {
    Some(Edge {
        id: map.get_string("id")?,
        source: map.get_string("source")?,
        target: map.get_string("target")?,
        source_handle: map.get_string("source_handle"),
        target_handle: map.get_string("target_handle"),
        kind: map.get_string("type").unwrap_or_else(|| "default".to_string()),
    })
}

pub(crate) fn push_edge(edges: &LoroList, edge: &Edge) -> Result<()> {
    let map = edges.push_container(LoroMap::new())?;
    map.insert("id", edge.id.as_str())?;
    map.insert("source", edge.source.as_str())?;
    map.insert("target", edge.target.as_str())?;
    insert_opt_str(&map, "source_handle", edge.source_handle.as_deref())?;
    insert_opt_str(&map, "target_handle", edge.target_handle.as_deref())?;
    map.insert("type", edge.kind.as_str())?;
    Ok(())
}

// -- card packs --------------------------------------------------------------

pub(crate) fn read_card_pack(map: &LoroMap) -> Option<CardPack> {
    let theme = match map.get_string("theme").as_deref() {
        Some("gradient") => CardTheme::Gradient,
        _ => CardTheme::Default,
    };
    Some(CardPack {
        id: map.get_string("id")?,
        title: map.get_string("title").unwrap_or_default(),
        description: map.get_string("description").unwrap_or_default(),
        cards: map.get_json::<Vec<Card>>("cards").unwrap_or_default(),
        timestamp: map.get_i64("timestamp").unwrap_or(0),
        cost: map.get_f64("cost").unwrap_or(0.0),
        theme,
        gradient_color: map.get_string("gradient_color"),
        ai_model: map.get_string("ai_model"),
    })
}

pub(crate) fn write_card_pack(map: &LoroMap, pack: &CardPack) -> Result<()> {
    map.insert("id", pack.id.as_str())?;
    map.insert("title", pack.title.as_str())?;
    map.insert("description", pack.description.as_str())?;
    map.insert("cards", serde_json::to_string(&pack.cards)?)?;
    map.insert("timestamp", pack.timestamp)?;
    map.insert("cost", pack.cost)?;
    map.insert(
        "theme",
        match pack.theme {
            CardTheme::Default => "default",
            CardTheme::Gradient => "gradient",
        },
    )?;
    insert_opt_str(map, "gradient_color", pack.gradient_color.as_deref())?;
    insert_opt_str(map, "ai_model", pack.ai_model.as_deref())?;
    Ok(())
}

// -- lookups -----------------------------------------------------------------

pub(crate) fn branch_map(doc: &LoroDoc, branch_id: &str) -> Result<LoroMap> {
    doc.get_map(BRANCHES)
        .get_map_container(branch_id)
        .ok_or_else(|| {
            ApiError::BranchNotFound {
                id: branch_id.to_string(),
            }
            .into()
        })
}

pub(crate) fn knowledge_map(doc: &LoroDoc, node_id: &str) -> Result<LoroMap> {
    doc.get_map(KNOWLEDGES)
        .get_map_container(node_id)
        .ok_or_else(|| {
            ApiError::NodeNotFound {
                id: node_id.to_string(),
            }
            .into()
        })
}

/// Messages list of a branch together with the index of `message_id`.
pub(crate) fn locate_message(
    doc: &LoroDoc,
    branch_id: &str,
    message_id: &str,
) -> Result<(LoroList, usize)> {
    let branch = branch_map(doc, branch_id)?;
    let messages = match branch.get_list_container(MESSAGES) {
        Some(list) => list,
        None => branch.insert_container(MESSAGES, LoroList::new())?,
    };
    let index = messages
        .position_by_field("id", message_id)
        .ok_or_else(|| ApiError::MessageNotFound {
            id: message_id.to_string(),
        })?;
    Ok((messages, index))
}

pub(crate) fn message_map(doc: &LoroDoc, branch_id: &str, message_id: &str) -> Result<LoroMap> {
    let (messages, index) = locate_message(doc, branch_id, message_id)?;
    messages
        .get(index)
        .and_then(as_map)
        .ok_or_else(|| {
            ApiError::MessageNotFound {
                id: message_id.to_string(),
            }
            .into()
        })
}

pub(crate) fn messages_list(doc: &LoroDoc, branch_id: &str) -> Result<LoroList> {
    let branch = branch_map(doc, branch_id)?;
    match branch.get_list_container(MESSAGES) {
        Some(list) => Ok(list),
        None => Ok(branch.insert_container(MESSAGES, LoroList::new())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visboard_api::MAIN_BRANCH_ID;

    fn sample_branch() -> (Node, BranchData) {
        let mut first = Message::new("m1", Role::Assistant, "Hello", 10);
        first.followups = vec!["Tell me more".to_string()];
        let data = BranchData {
            title: "Main".to_string(),
            messages: vec![first, Message {
                content: None,
                ..Message::new("m2", Role::Tool, "", 11)
            }],
            parent_branch_id: None,
            bg_color: Some("#fff".to_string()),
        };
        (Node::branch(MAIN_BRANCH_ID, data.clone()), data)
    }

    #[test]
    fn test_empty_document_projects_defaults() -> Result<()> {
        let doc = LoroDoc::new();
        BoardSchema::initialize(&doc)?;
        let snapshot = BoardSchema::project(&doc)?;
        assert_eq!(snapshot, BoardSnapshot::default());
        Ok(())
    }

    #[test]
    fn test_branch_round_trip() -> Result<()> {
        let doc = LoroDoc::new();
        let (node, data) = sample_branch();
        insert_branch(&doc.get_map(BRANCHES), &node, &data)?;

        let snapshot = BoardSchema::project(&doc)?;
        assert_eq!(snapshot.branches, vec![node]);
        Ok(())
    }

    #[test]
    fn test_nodes_keep_insertion_order() -> Result<()> {
        let doc = LoroDoc::new();
        let knowledges = doc.get_map(KNOWLEDGES);
        for id in ["zeta", "alpha", "mid"] {
            let data = KnowledgeData {
                branch_id: MAIN_BRANCH_ID.to_string(),
                title: None,
                content: id.to_string(),
                timestamp: 0,
                took_seconds: 0.0,
                token_per_second: 0.0,
                parent_id: None,
                side: Side::Right,
            };
            insert_knowledge(&knowledges, &Node::knowledge(id, data.clone()), &data)?;
        }

        let ids: Vec<_> = BoardSchema::project(&doc)?
            .knowledges
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        Ok(())
    }

    #[test]
    fn test_missing_branch_is_typed_error() {
        let doc = LoroDoc::new();
        let err = branch_map(&doc, "nope").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::BranchNotFound {
                id: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_message_text_upgrades_null_content() -> Result<()> {
        let doc = LoroDoc::new();
        let (node, data) = sample_branch();
        insert_branch(&doc.get_map(BRANCHES), &node, &data)?;

        let map = message_map(&doc, MAIN_BRANCH_ID, "m2")?;
        crate::store::loro_ext::append_text(&message_text(&map)?, "filled")?;

        let message = read_message(&map).expect("message");
        assert_eq!(message.content.as_deref(), Some("filled"));
        Ok(())
    }
}
