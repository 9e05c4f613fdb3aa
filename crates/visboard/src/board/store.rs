use super::make_id;
use super::schema::{self, BRANCHES, BoardSchema, BoardSnapshot, CARD_PACKS, CONFIG, EDGES, KNOWLEDGES};
use super::service::BoardService;
use crate::layout::compute_layout;
use crate::store::loro_ext::{append_text, insert_opt_f64, replace_text};
use crate::store::{LoroListExt, LoroMapExt, StoreFactory, SyncedStore};
use loro::LoroMap;
use tracing::{debug, info};
use visboard_api::{
    ApiError, BoardConfig, BranchData, CardPack, Edge, KnowledgeData, Message, Node, Position,
};

/// Typed operations on one board document.
///
/// Every method is one transaction on the underlying [`SyncedStore`].
#[derive(Clone)]
pub struct BoardStore {
    board_id: String,
    store: SyncedStore<BoardSchema>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl BoardStore {
    /// Open (and load) the board `board_id`.
    pub async fn open(factory: &StoreFactory, board_id: &str) -> Result<Self, ApiError> {
        let store = factory.create::<BoardSchema>(board_id).await?;
        Ok(Self::from_store(board_id, store))
    }

    pub fn from_store(board_id: impl Into<String>, store: SyncedStore<BoardSchema>) -> Self {
        Self {
            board_id: board_id.into(),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.board_id
    }

    /// The underlying synced store, for subscriptions and replication.
    pub fn store(&self) -> &SyncedStore<BoardSchema> {
        &self.store
    }

    pub async fn snapshot(&self) -> Result<BoardSnapshot, ApiError> {
        self.store.snapshot().await
    }

    pub async fn config(&self) -> Result<BoardConfig, ApiError> {
        self.store
            .read(|doc| Ok(schema::read_config(&doc.get_map(CONFIG))))
            .await
    }

    /// Fill an empty board with the default config and main branch.
    ///
    /// Returns `false` without touching the document when the board was
    /// already initialized.
    pub async fn initialize(&self, title: &str) -> Result<bool, ApiError> {
        let board_id = self.board_id.clone();
        let created = self
            .store
            .transact(|doc| {
                let config = doc.get_map(CONFIG);
                if config.get_bool("is_initialized").unwrap_or(false) {
                    return Ok(false);
                }

                let branches = doc.get_map(BRANCHES);
                let (node, data) = BoardService::main_branch(now_ms());
                if branches.get_map_container(&node.id).is_none() {
                    schema::insert_branch(&branches, &node, &data)?;
                }
                schema::write_config(&config, &BoardService::default_config(&board_id, title))?;
                Ok(true)
            })
            .await?;

        if created {
            info!("Initialized board '{}'", self.board_id);
        }
        Ok(created)
    }

    pub async fn rename(&self, title: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                doc.get_map(CONFIG).insert("title", title)?;
                Ok(())
            })
            .await
    }

    pub async fn set_active_branch(&self, branch_id: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                schema::branch_map(doc, branch_id)?;
                doc.get_map(CONFIG).insert("active_branch", branch_id)?;
                Ok(())
            })
            .await
    }

    /// The branch named by `config.active_branch`, if it exists.
    pub async fn active_branch(&self) -> Result<Option<Node>, ApiError> {
        Ok(self.snapshot().await?.active_branch().cloned())
    }

    /// Create an empty branch and return its id.
    pub async fn add_branch(
        &self,
        title: &str,
        parent_branch_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let id = make_id();
        self.store
            .transact(|doc| {
                if let Some(parent) = parent_branch_id {
                    schema::branch_map(doc, parent)?;
                }
                let data = BranchData {
                    title: title.to_string(),
                    messages: Vec::new(),
                    parent_branch_id: parent_branch_id.map(str::to_string),
                    bg_color: None,
                };
                schema::insert_branch(&doc.get_map(BRANCHES), &Node::branch(&id, data.clone()), &data)?;
                Ok(())
            })
            .await?;
        debug!("Added branch '{}' to board '{}'", id, self.board_id);
        Ok(id)
    }

    pub async fn push_message(&self, branch_id: &str, message: &Message) -> Result<(), ApiError> {
        self.store
            .transact(|doc| schema::push_message(&schema::messages_list(doc, branch_id)?, message))
            .await
    }

    /// Append one streamed chunk to a message's content.
    pub async fn append_to_message(
        &self,
        branch_id: &str,
        message_id: &str,
        chunk: &str,
    ) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::message_map(doc, branch_id, message_id)?;
                append_text(&schema::message_text(&map)?, chunk)
            })
            .await
    }

    /// Clear a message before it is regenerated.
    pub async fn reset_message(&self, branch_id: &str, message_id: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::message_map(doc, branch_id, message_id)?;
                replace_text(&schema::message_text(&map)?, "")?;
                map.insert("timestamp", now_ms())?;
                schema::write_followups(&map, &[])?;
                Ok(())
            })
            .await
    }

    pub async fn set_followups(
        &self,
        branch_id: &str,
        message_id: &str,
        followups: &[String],
    ) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::message_map(doc, branch_id, message_id)?;
                schema::write_followups(&map, followups)
            })
            .await
    }

    /// Record generation timing on a message.
    pub async fn set_message_stats(
        &self,
        branch_id: &str,
        message_id: &str,
        took_seconds: f64,
        token_per_second: f64,
    ) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::message_map(doc, branch_id, message_id)?;
                insert_opt_f64(&map, "took_seconds", Some(took_seconds))?;
                insert_opt_f64(&map, "token_per_second", Some(token_per_second))?;
                Ok(())
            })
            .await
    }

    pub async fn delete_message(&self, branch_id: &str, message_id: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let (messages, index) = schema::locate_message(doc, branch_id, message_id)?;
                messages.delete(index, 1)?;
                Ok(())
            })
            .await
    }

    /// Create a knowledge node and the edge that connects it to its owner.
    ///
    /// The owner is `data.parent_id` when set, else `data.branch_id`. The
    /// edge leaves the owner on `data.side` and enters the node on the
    /// facing side.
    pub async fn add_knowledge(&self, data: KnowledgeData) -> Result<String, ApiError> {
        let id = make_id();
        self.store
            .transact(|doc| {
                schema::branch_map(doc, &data.branch_id)?;
                let source = match &data.parent_id {
                    Some(parent) => {
                        schema::knowledge_map(doc, parent)?;
                        parent.clone()
                    }
                    None => data.branch_id.clone(),
                };

                let node = Node::knowledge(&id, data.clone());
                schema::insert_knowledge(&doc.get_map(KNOWLEDGES), &node, &data)?;
                schema::push_edge(
                    &doc.get_list(EDGES),
                    &Edge::to_side(make_id(), source, &id, data.side),
                )?;
                Ok(())
            })
            .await?;
        debug!("Added knowledge '{}' to board '{}'", id, self.board_id);
        Ok(id)
    }

    pub async fn append_knowledge_content(&self, node_id: &str, chunk: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::knowledge_map(doc, node_id)?;
                append_text(&schema::knowledge_text(&map)?, chunk)
            })
            .await
    }

    pub async fn set_knowledge_stats(
        &self,
        node_id: &str,
        took_seconds: f64,
        token_per_second: f64,
    ) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = schema::knowledge_map(doc, node_id)?;
                map.insert("took_seconds", took_seconds)?;
                map.insert("token_per_second", token_per_second)?;
                Ok(())
            })
            .await
    }

    pub async fn resize_knowledge(&self, node_id: &str, width: f64, height: f64) -> Result<(), ApiError> {
        if !(width > 0.0 && height > 0.0) {
            return Err(ApiError::InvalidOperation {
                message: format!("invalid size {width}x{height} for node {node_id}"),
            });
        }
        self.store
            .transact(|doc| {
                let map = schema::knowledge_map(doc, node_id)?;
                schema::write_size(&map, Some(width), Some(height))
            })
            .await
    }

    /// Store a position for a branch or knowledge node.
    pub async fn move_node(&self, node_id: &str, position: Position) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let map = doc
                    .get_map(BRANCHES)
                    .get_map_container(node_id)
                    .or_else(|| doc.get_map(KNOWLEDGES).get_map_container(node_id))
                    .ok_or_else(|| ApiError::NodeNotFound {
                        id: node_id.to_string(),
                    })?;
                schema::write_position(&map, position)
            })
            .await
    }

    /// Remove a knowledge node and every edge pointing at it.
    pub async fn delete_knowledge(&self, node_id: &str) -> Result<(), ApiError> {
        let removed_edges = self
            .store
            .transact(|doc| {
                schema::knowledge_map(doc, node_id)?;
                doc.get_map(KNOWLEDGES).delete(node_id)?;

                let edges = doc.get_list(EDGES);
                let targets: Vec<usize> = edges
                    .collect_map(|v| Some(schema::as_map(v).and_then(|m| m.get_string("target"))))
                    .into_iter()
                    .enumerate()
                    .filter(|(_, target)| target.as_deref() == Some(node_id))
                    .map(|(index, _)| index)
                    .collect();
                for index in targets.iter().rev() {
                    edges.delete(*index, 1)?;
                }
                Ok(targets.len())
            })
            .await?;
        debug!(
            "Deleted knowledge '{}' and {} edge(s) from board '{}'",
            node_id, removed_edges, self.board_id
        );
        Ok(())
    }

    /// Save a card pack, replacing any pack with the same id in place.
    pub async fn save_card_pack(&self, pack: &CardPack) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let packs = doc.get_list(CARD_PACKS);
                let map = match packs.position_by_field("id", &pack.id) {
                    Some(index) => {
                        packs.delete(index, 1)?;
                        packs.insert_container(index, LoroMap::new())?
                    }
                    None => packs.push_container(LoroMap::new())?,
                };
                schema::write_card_pack(&map, pack)
            })
            .await
    }

    /// Card packs, newest first, optionally filtered by a case-insensitive
    /// title search.
    pub async fn card_packs(&self, search: &str) -> Result<Vec<CardPack>, ApiError> {
        let packs = self.snapshot().await?.card_packs;
        Ok(packs
            .into_iter()
            .rev()
            .filter(|pack| search.is_empty() || pack.matches(search))
            .collect())
    }

    pub async fn nodes(&self) -> Result<Vec<Node>, ApiError> {
        Ok(self.snapshot().await?.nodes())
    }

    pub async fn edges(&self) -> Result<Vec<Edge>, ApiError> {
        Ok(self.snapshot().await?.edges)
    }

    /// Nodes with layout positions computed from the current snapshot.
    pub async fn layout(&self) -> Result<Vec<Node>, ApiError> {
        let snapshot = self.snapshot().await?;
        Ok(compute_layout(&snapshot.nodes(), &snapshot.edges)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::service::GREETING;
    use anyhow::Result;
    use visboard_api::{Card, MAIN_BRANCH_ID, Role, Side};

    async fn board() -> Result<BoardStore> {
        let store = BoardStore::open(&StoreFactory::in_memory(), "b1").await?;
        store.initialize("Notes").await?;
        Ok(store)
    }

    fn knowledge(side: Side, parent: Option<&str>) -> KnowledgeData {
        KnowledgeData {
            branch_id: MAIN_BRANCH_ID.to_string(),
            title: Some("Fact".to_string()),
            content: "content".to_string(),
            timestamp: 1,
            took_seconds: 0.0,
            token_per_second: 0.0,
            parent_id: parent.map(str::to_string),
            side,
        }
    }

    #[tokio::test]
    async fn test_initialize_once() -> Result<()> {
        let store = board().await?;
        let config = store.config().await?;
        assert_eq!(config.id, "b1");
        assert_eq!(config.title, "Notes");
        assert_eq!(config.active_branch, MAIN_BRANCH_ID);

        store.rename("Renamed").await?;
        assert!(!store.initialize("Again").await?);
        assert_eq!(store.config().await?.title, "Renamed");

        let branch = store.active_branch().await?.expect("main branch");
        let messages = &branch.as_branch().expect("branch data").messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content_str(), GREETING);
        Ok(())
    }

    #[tokio::test]
    async fn test_message_lifecycle() -> Result<()> {
        let store = board().await?;
        let message = Message::new("a1", Role::Assistant, "", 5);
        store.push_message(MAIN_BRANCH_ID, &message).await?;

        for chunk in ["Ru", "st", "!"] {
            store.append_to_message(MAIN_BRANCH_ID, "a1", chunk).await?;
        }
        store
            .set_followups(MAIN_BRANCH_ID, "a1", &["Why Rust".to_string()])
            .await?;

        let find = |node: Node| {
            node.as_branch()
                .and_then(|b| b.messages.iter().find(|m| m.id == "a1").cloned())
        };
        let written = find(store.active_branch().await?.expect("branch")).expect("message");
        assert_eq!(written.content_str(), "Rust!");
        assert_eq!(written.followups, vec!["Why Rust".to_string()]);

        store.reset_message(MAIN_BRANCH_ID, "a1").await?;
        let reset = find(store.active_branch().await?.expect("branch")).expect("message");
        assert_eq!(reset.content_str(), "");
        assert!(reset.followups.is_empty());

        store.delete_message(MAIN_BRANCH_ID, "a1").await?;
        assert!(find(store.active_branch().await?.expect("branch")).is_none());

        assert_eq!(
            store.delete_message(MAIN_BRANCH_ID, "a1").await,
            Err(ApiError::MessageNotFound {
                id: "a1".to_string()
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_branch_switching() -> Result<()> {
        let store = board().await?;
        let side = store.add_branch("Side quest", Some(MAIN_BRANCH_ID)).await?;
        store.set_active_branch(&side).await?;

        let active = store.active_branch().await?.expect("active");
        assert_eq!(active.id, side);
        assert_eq!(
            active.as_branch().and_then(|b| b.parent_branch_id.as_deref()),
            Some(MAIN_BRANCH_ID)
        );

        assert!(matches!(
            store.set_active_branch("missing").await,
            Err(ApiError::BranchNotFound { .. })
        ));
        assert_eq!(store.config().await?.active_branch, side);
        Ok(())
    }

    #[tokio::test]
    async fn test_knowledge_edges_and_delete() -> Result<()> {
        let store = board().await?;
        let left = store.add_knowledge(knowledge(Side::Left, None)).await?;
        let child = store.add_knowledge(knowledge(Side::Left, Some(&left))).await?;

        let edges = store.edges().await?;
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].source, MAIN_BRANCH_ID);
        assert_eq!(edges[0].source_handle.as_deref(), Some("left"));
        assert_eq!(edges[0].target_handle.as_deref(), Some("right"));
        assert_eq!(edges[1].source, left);
        assert_eq!(edges[1].target, child);

        store.delete_knowledge(&left).await?;
        let snapshot = store.snapshot().await?;
        assert!(snapshot.knowledge(&left).is_none());
        assert_eq!(snapshot.edges.len(), 1);
        assert!(snapshot.edges.iter().all(|e| e.target != left));
        Ok(())
    }

    #[tokio::test]
    async fn test_knowledge_requires_owner() -> Result<()> {
        let store = board().await?;
        let orphan = KnowledgeData {
            branch_id: "nope".to_string(),
            ..knowledge(Side::Right, None)
        };
        assert!(matches!(
            store.add_knowledge(orphan).await,
            Err(ApiError::BranchNotFound { .. })
        ));
        assert!(matches!(
            store.add_knowledge(knowledge(Side::Right, Some("ghost"))).await,
            Err(ApiError::NodeNotFound { .. })
        ));
        assert!(store.snapshot().await?.knowledges.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_resize_and_move() -> Result<()> {
        let store = board().await?;
        let id = store.add_knowledge(knowledge(Side::Right, None)).await?;

        store.resize_knowledge(&id, 320.0, 200.0).await?;
        store.move_node(&id, Position::new(10.0, -4.0)).await?;
        assert!(store.resize_knowledge(&id, 0.0, 10.0).await.is_err());

        let snapshot = store.snapshot().await?;
        let node = snapshot.knowledge(&id).expect("node");
        assert_eq!((node.width, node.height), (Some(320.0), Some(200.0)));
        assert_eq!(node.position, Position::new(10.0, -4.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_card_packs_newest_first_with_search() -> Result<()> {
        let store = board().await?;
        for (id, title) in [("1", "Rust basics"), ("2", "Cooking"), ("3", "Advanced RUST")] {
            store
                .save_card_pack(&CardPack {
                    id: id.to_string(),
                    title: title.to_string(),
                    description: String::new(),
                    cards: vec![Card {
                        id: "1".to_string(),
                        title: "Q".to_string(),
                        description: "A".to_string(),
                    }],
                    timestamp: 0,
                    cost: 0.0,
                    theme: Default::default(),
                    gradient_color: None,
                    ai_model: None,
                })
                .await?;
        }

        let all: Vec<_> = store.card_packs("").await?.into_iter().map(|p| p.id).collect();
        assert_eq!(all, vec!["3", "2", "1"]);

        let rust: Vec<_> = store.card_packs("rust").await?.into_iter().map(|p| p.id).collect();
        assert_eq!(rust, vec!["3", "1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_layout_positions_children_by_side() -> Result<()> {
        let store = board().await?;
        let left = store.add_knowledge(knowledge(Side::Left, None)).await?;
        let right = store.add_knowledge(knowledge(Side::Right, None)).await?;

        let nodes = store.layout().await?;
        let x = |id: &str| {
            nodes
                .iter()
                .find(|n| n.id == id)
                .map(|n| n.position.x)
                .expect("positioned")
        };
        assert!(x(&left) < 0.0);
        assert!(x(&right) > 0.0);
        Ok(())
    }
}
