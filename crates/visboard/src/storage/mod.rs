//! Local persistence of room documents
//!
//! A room's document is stored as an append-only log of Loro updates that is
//! periodically compacted into a single snapshot.
//!
//! - `persistence`: the `DocumentPersistence` seam used by synced stores
//! - `sqlite`: embedded SQLite implementation (one table, rows keyed by room)
//! - `memory`: process-local implementation for tests and ephemeral boards

pub mod memory;
pub mod persistence;
pub mod sqlite;

pub use memory::MemoryPersistence;
pub use persistence::DocumentPersistence;
pub use sqlite::SqlitePersistence;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare storage location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StorageError> for visboard_api::ApiError {
    fn from(e: StorageError) -> Self {
        visboard_api::ApiError::storage(e)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
