use serde::{Deserialize, Serialize};

/// ID of the branch every new board starts with.
pub const MAIN_BRANCH_ID: &str = "main-branch";

/// Version written into `BoardConfig::version` for new boards.
pub const BOARD_SCHEMA_VERSION: &str = "0.1";

/// Per-board singleton configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub id: String,
    pub title: String,
    pub version: String,
    pub active_branch: String,
    pub is_initialized: bool,
}

/// Row of the board directory shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardEntry {
    pub id: String,
    pub title: String,
}
