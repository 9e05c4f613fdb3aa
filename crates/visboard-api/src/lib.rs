use serde::{Deserialize, Serialize};

pub mod board;
pub mod card;
pub mod node;
pub mod streaming;

// Re-export board types
pub use board::{BoardConfig, BoardEntry, BOARD_SCHEMA_VERSION, MAIN_BRANCH_ID};

// Re-export card types
pub use card::{Card, CardPack, CardTheme};

// Re-export node types
pub use node::{
    BranchData, Edge, KnowledgeData, Message, Node, NodeData, NodeKind, Position, Role, Side,
};

// Re-export streaming types
pub use streaming::{ChangeOrigin, EventSubscribers, StoreEvent, StoreStatus};

/// Structured error types for board operations.
///
/// Serializable so frontends can surface them without string matching.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error, PartialEq)]
pub enum ApiError {
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    #[error("Branch not found: {id}")]
    BranchNotFound { id: String },

    #[error("Message not found: {id}")]
    MessageNotFound { id: String },

    #[error("Board not found: {id}")]
    BoardNotFound { id: String },

    #[error("Store for room {room_id} is not ready")]
    StoreNotReady { room_id: String },

    #[error("Store for room {room_id} has been disposed")]
    StoreDisposed { room_id: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ApiError {
    pub fn internal(message: impl std::fmt::Display) -> Self {
        ApiError::InternalError {
            message: message.to_string(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        ApiError::StorageError {
            message: message.to_string(),
        }
    }

    /// Whether the error reports a missing entity rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ApiError::NodeNotFound { .. }
                | ApiError::BranchNotFound { .. }
                | ApiError::MessageNotFound { .. }
                | ApiError::BoardNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_serialization() {
        let errors = vec![
            ApiError::NodeNotFound {
                id: "k-1".to_string(),
            },
            ApiError::StoreDisposed {
                room_id: "board-1".to_string(),
            },
            ApiError::NetworkError {
                message: "connection refused".to_string(),
            },
        ];

        for error in errors {
            let json = serde_json::to_string(&error).expect("Failed to serialize error");
            let deserialized: ApiError =
                serde_json::from_str(&json).expect("Failed to deserialize error");
            assert_eq!(error, deserialized);
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ApiError::BranchNotFound { id: "b".into() }.is_not_found());
        assert!(!ApiError::internal("boom").is_not_found());
    }
}
