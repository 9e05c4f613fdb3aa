use super::schema::{BoardSchema, as_map};
use super::service::{BoardService, DEFAULT_BOARD_TITLE};
use super::store::BoardStore;
use super::make_id;
use crate::store::{LoroListExt, LoroMapExt, Schema, StoreFactory, SyncedStore};
use anyhow::Result;
use loro::{LoroDoc, LoroMap};
use tracing::info;
use visboard_api::{ApiError, BoardEntry};

pub const DIRECTORY_ROOM: &str = "global";
const CHATS: &str = "chats";

/// The global room: the list of boards shown on the dashboard.
pub struct DirectorySchema;

impl Schema for DirectorySchema {
    const ROOM_PREFIX: &'static str = "";
    type Snapshot = Vec<BoardEntry>;

    fn initialize(doc: &LoroDoc) -> Result<()> {
        doc.get_list(CHATS);
        Ok(())
    }

    fn project(doc: &LoroDoc) -> Result<Vec<BoardEntry>> {
        Ok(doc.get_list(CHATS).collect_map(|v| {
            let map = as_map(v)?;
            Some(BoardEntry {
                id: map.get_string("id")?,
                title: map.get_string("title").unwrap_or_default(),
            })
        }))
    }
}

/// Creates, lists, renames and deletes boards.
#[derive(Clone)]
pub struct BoardDirectory {
    factory: StoreFactory,
    store: SyncedStore<DirectorySchema>,
}

impl BoardDirectory {
    pub async fn open(factory: StoreFactory) -> Result<Self, ApiError> {
        let store = factory.create::<DirectorySchema>(DIRECTORY_ROOM).await?;
        Ok(Self { factory, store })
    }

    pub fn store(&self) -> &SyncedStore<DirectorySchema> {
        &self.store
    }

    /// Create and initialize a board, then list it.
    pub async fn create_board(&self, title: &str) -> Result<BoardStore, ApiError> {
        let title = if title.trim().is_empty() {
            DEFAULT_BOARD_TITLE
        } else {
            title
        };
        let id = make_id();
        let board = BoardStore::open(&self.factory, &id).await?;
        board.initialize(title).await?;

        let entry = BoardService::chat_entry(&id, title);
        self.store
            .transact(|doc| {
                let map = doc.get_list(CHATS).push_container(LoroMap::new())?;
                map.insert("id", entry.id.as_str())?;
                map.insert("title", entry.title.as_str())?;
                Ok(())
            })
            .await?;

        info!("Created board '{}' ({})", title, id);
        Ok(board)
    }

    /// Boards, newest first.
    pub async fn list_boards(&self) -> Result<Vec<BoardEntry>, ApiError> {
        let mut entries = self.store.snapshot().await?;
        entries.reverse();
        Ok(entries)
    }

    /// Open a listed board.
    pub async fn open_board(&self, id: &str) -> Result<BoardStore, ApiError> {
        self.ensure_listed(id).await?;
        BoardStore::open(&self.factory, id).await
    }

    /// Rename both the directory entry and the board's own config.
    pub async fn rename_board(&self, id: &str, title: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let chats = doc.get_list(CHATS);
                let index = chats
                    .position_by_field("id", id)
                    .ok_or_else(|| ApiError::BoardNotFound { id: id.to_string() })?;
                if let Some(map) = chats.get(index).and_then(as_map) {
                    map.insert("title", title)?;
                }
                Ok(())
            })
            .await?;

        // an already open board is the same instance, so its holders see the title
        BoardStore::open(&self.factory, id).await?.rename(title).await
    }

    /// Remove the entry and wipe the board's stored data. An open
    /// `BoardStore` on it is disposed.
    pub async fn delete_board(&self, id: &str) -> Result<(), ApiError> {
        self.store
            .transact(|doc| {
                let chats = doc.get_list(CHATS);
                let index = chats
                    .position_by_field("id", id)
                    .ok_or_else(|| ApiError::BoardNotFound { id: id.to_string() })?;
                chats.delete(index, 1)?;
                Ok(())
            })
            .await?;

        self.factory.clear_room::<BoardSchema>(id).await?;
        info!("Deleted board '{}'", id);
        Ok(())
    }

    async fn ensure_listed(&self, id: &str) -> Result<(), ApiError> {
        let entries = self.store.snapshot().await?;
        if entries.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(ApiError::BoardNotFound { id: id.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPersistence;

    fn factory() -> StoreFactory {
        StoreFactory::with_memory_persistence(MemoryPersistence::new())
    }

    #[tokio::test]
    async fn test_create_and_list_newest_first() -> Result<()> {
        let directory = BoardDirectory::open(factory()).await?;
        let first = directory.create_board("First").await?;
        let second = directory.create_board("  ").await?;

        let entries = directory.list_boards().await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second.id());
        assert_eq!(entries[0].title, DEFAULT_BOARD_TITLE);
        assert_eq!(entries[1].id, first.id());
        assert_eq!(first.config().await?.title, "First");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_updates_entry_and_config() -> Result<()> {
        let directory = BoardDirectory::open(factory()).await?;
        let board = directory.create_board("Old").await?;
        let id = board.id().to_string();
        board.store().dispose().await;

        directory.rename_board(&id, "New").await?;
        assert_eq!(directory.list_boards().await?[0].title, "New");

        let reopened = directory.open_board(&id).await?;
        assert_eq!(reopened.config().await?.title, "New");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_clears_board_room() -> Result<()> {
        let persistence = MemoryPersistence::new();
        let directory =
            BoardDirectory::open(StoreFactory::with_memory_persistence(persistence.clone())).await?;
        let board = directory.create_board("Doomed").await?;
        let id = board.id().to_string();
        board.store().dispose().await;

        directory.delete_board(&id).await?;
        assert!(directory.list_boards().await?.is_empty());
        assert!(!persistence.room_ids().contains(&BoardSchema::room_id(&id)));
        assert!(matches!(
            directory.open_board(&id).await,
            Err(ApiError::BoardNotFound { .. })
        ));
        assert!(matches!(
            directory.delete_board(&id).await,
            Err(ApiError::BoardNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_open_board_sees_rename_and_delete() -> Result<()> {
        let persistence = MemoryPersistence::new();
        let directory =
            BoardDirectory::open(StoreFactory::with_memory_persistence(persistence.clone())).await?;
        let board = directory.create_board("Draft").await?;
        let id = board.id().to_string();

        directory.rename_board(&id, "Final").await?;
        assert_eq!(board.config().await?.title, "Final");
        assert_eq!(directory.list_boards().await?[0].title, "Final");

        directory.delete_board(&id).await?;
        assert!(matches!(
            board.rename("zombie").await,
            Err(ApiError::StoreDisposed { .. })
        ));
        assert!(!persistence.room_ids().contains(&BoardSchema::room_id(&id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_survives_reopen() -> Result<()> {
        let factory = factory();
        let directory = BoardDirectory::open(factory.clone()).await?;
        directory.create_board("Kept").await?;
        directory.store().dispose().await;

        let reopened = BoardDirectory::open(factory).await?;
        assert_eq!(reopened.list_boards().await?[0].title, "Kept");
        Ok(())
    }
}
