use super::make_id;
use visboard_api::{
    BOARD_SCHEMA_VERSION, BoardConfig, BoardEntry, BranchData, MAIN_BRANCH_ID, Message, Node,
    Role,
};

pub const DEFAULT_BOARD_TITLE: &str = "Unknown";
pub const MAIN_BRANCH_TITLE: &str = "Main";
pub const GREETING: &str = "Hey, How can i Help you?!";

/// Content of a freshly created board.
pub struct BoardService;

impl BoardService {
    pub fn default_config(id: &str, title: &str) -> BoardConfig {
        BoardConfig {
            id: id.to_string(),
            title: title.to_string(),
            version: BOARD_SCHEMA_VERSION.to_string(),
            active_branch: MAIN_BRANCH_ID.to_string(),
            is_initialized: true,
        }
    }

    /// The `main-branch` node, opening with the assistant greeting.
    pub fn main_branch(now: i64) -> (Node, BranchData) {
        let greeting = Message {
            took_seconds: Some(0.0),
            token_per_second: Some(0.0),
            ..Message::new(make_id(), Role::Assistant, GREETING, now)
        };
        let data = BranchData {
            title: MAIN_BRANCH_TITLE.to_string(),
            messages: vec![greeting],
            parent_branch_id: None,
            bg_color: None,
        };
        (Node::branch(MAIN_BRANCH_ID, data.clone()), data)
    }

    pub fn chat_entry(id: &str, title: &str) -> BoardEntry {
        BoardEntry {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_board_shape() {
        let config = BoardService::default_config("b1", "Notes");
        assert_eq!(config.active_branch, MAIN_BRANCH_ID);
        assert_eq!(config.version, "0.1");
        assert!(config.is_initialized);

        let (node, data) = BoardService::main_branch(42);
        assert_eq!(node.id, MAIN_BRANCH_ID);
        assert_eq!(data.messages.len(), 1);
        assert_eq!(data.messages[0].content_str(), GREETING);
        assert_eq!(data.messages[0].role, Role::Assistant);
    }
}
