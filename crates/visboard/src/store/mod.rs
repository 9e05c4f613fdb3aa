//! Reactive CRDT-backed stores
//!
//! - `schema`: the `Schema` trait naming a store's containers and projection
//! - `synced_store`: `SyncedStore<S>`, the single transactional mutation API
//! - `loro_ext`: typed accessors over Loro maps, lists and text

pub mod loro_ext;
pub mod schema;
pub mod synced_store;

pub use loro_ext::{LoroListExt, LoroMapExt};
pub use schema::Schema;
pub use synced_store::{DEFAULT_COMPACT_THRESHOLD, EventStream, SUBSCRIBER_BUFFER, SyncedStore};

use crate::storage::{DocumentPersistence, MemoryPersistence, SqlitePersistence};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use visboard_api::{ApiError, StoreStatus};

/// Live stores by room id. Values are `SyncedStore<S>` for the room's schema.
type OpenRooms = Arc<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>>;

/// Creates connected stores that share one persistence backend.
///
/// A room has at most one live store per factory: creating a room that is
/// already open hands back the open instance, so every holder sees the same
/// writes and the same disposal.
#[derive(Clone)]
pub struct StoreFactory {
    persistence: Option<Arc<dyn DocumentPersistence>>,
    open: OpenRooms,
}

impl StoreFactory {
    /// Stores that live only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            persistence: None,
            open: OpenRooms::default(),
        }
    }

    pub fn with_persistence(persistence: Arc<dyn DocumentPersistence>) -> Self {
        Self {
            persistence: Some(persistence),
            open: OpenRooms::default(),
        }
    }

    /// Shared in-process persistence; stores recreated from the same factory
    /// reload what earlier instances wrote.
    pub fn with_memory_persistence(persistence: MemoryPersistence) -> Self {
        Self::with_persistence(Arc::new(persistence))
    }

    /// Open the SQLite database at `path`, falling back to memory-only stores
    /// when it cannot be opened.
    pub fn sqlite_or_memory(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match SqlitePersistence::open(path) {
            Ok(db) => Self::with_persistence(Arc::new(db)),
            Err(e) => {
                warn!(
                    "Local storage at {} unavailable, boards will not be saved: {}",
                    path.display(),
                    e
                );
                Self::in_memory()
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// The connected store for `id` (room `S::ROOM_PREFIX + id`).
    ///
    /// Returns the live instance when the room is already open; a disposed
    /// instance is replaced by a freshly loaded one.
    pub async fn create<S: Schema>(&self, id: &str) -> Result<SyncedStore<S>, ApiError> {
        let room_id = S::room_id(id);
        let (store, fresh) = {
            let mut open = self.rooms()?;
            let live = open
                .get(&room_id)
                .and_then(|entry| entry.downcast_ref::<SyncedStore<S>>())
                .filter(|store| store.status() != StoreStatus::Disposed)
                .cloned();
            match live {
                Some(store) => (store, false),
                None => {
                    let store = SyncedStore::<S>::new(room_id.clone(), self.persistence.clone())?;
                    open.insert(room_id.clone(), Box::new(store.clone()));
                    (store, true)
                }
            }
        };

        if !fresh {
            debug!("Reusing open store for room '{}'", room_id);
            store.wait_ready().await?;
            return Ok(store);
        }
        if let Err(e) = store.connect().await {
            self.rooms()?.remove(&room_id);
            return Err(e);
        }
        Ok(store)
    }

    /// Wipe stored data for a room. An open store on the room is disposed
    /// first, so later writes through it fail instead of landing in the
    /// wiped room.
    pub async fn clear_room<S: Schema>(&self, id: &str) -> Result<(), ApiError> {
        let room_id = S::room_id(id);
        let live = self
            .rooms()?
            .remove(&room_id)
            .and_then(|entry| entry.downcast::<SyncedStore<S>>().ok());

        match (live, &self.persistence) {
            (Some(store), _) => store.clear_data().await?,
            (None, Some(persistence)) => persistence.clear(&room_id).await?,
            (None, None) => {}
        }
        info!("Cleared stored data for room '{}'", room_id);
        Ok(())
    }

    fn rooms(&self) -> Result<MutexGuard<'_, HashMap<String, Box<dyn Any + Send + Sync>>>, ApiError> {
        self.open
            .lock()
            .map_err(|_| ApiError::internal("open room registry lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use loro::LoroDoc;
    use tokio_stream::StreamExt;
    use visboard_api::{ChangeOrigin, StoreEvent, StoreStatus};

    /// Minimal schema: one `values` map projected to its `title` field.
    struct TitleSchema;

    impl Schema for TitleSchema {
        const ROOM_PREFIX: &'static str = "test-";
        type Snapshot = Option<String>;

        fn initialize(doc: &LoroDoc) -> Result<()> {
            doc.get_map("values");
            Ok(())
        }

        fn project(doc: &LoroDoc) -> Result<Self::Snapshot> {
            Ok(doc.get_map("values").get_string("title"))
        }
    }

    async fn set_title(store: &SyncedStore<TitleSchema>, title: &str) -> Result<()> {
        let title = title.to_string();
        store
            .transact(move |doc| {
                doc.get_map("values").insert("title", title.as_str())?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_room_id_uses_prefix() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("abc").await?;
        assert_eq!(store.room_id(), "test-abc");
        assert_eq!(store.status(), StoreStatus::Ready);
        assert!(!store.is_persistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_then_read() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("rw").await?;
        assert_eq!(store.snapshot().await?, None);

        set_title(&store, "First").await?;
        assert_eq!(store.snapshot().await?.as_deref(), Some("First"));
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_rejected_before_connect() -> Result<()> {
        let store = SyncedStore::<TitleSchema>::new("test-early", None)?;
        let err = set_title(&store, "x").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::StoreNotReady {
                room_id: "test-early".to_string()
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_disposed_is_terminal() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("gone").await?;
        store.dispose().await;
        assert_eq!(store.status(), StoreStatus::Disposed);

        assert!(matches!(
            store.connect().await,
            Err(ApiError::StoreDisposed { .. })
        ));
        assert!(set_title(&store, "late").await.is_err());
        assert!(store.wait_ready().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribers_see_every_commit() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("sub").await?;
        let mut events = store.subscribe().await;
        let mut revision = store.watch_revision();

        set_title(&store, "a").await?;
        set_title(&store, "b").await?;

        let first = events.next().await.expect("first event");
        let second = events.next().await.expect("second event");
        assert_eq!(first.origin, ChangeOrigin::Local);
        assert_eq!(second.revision, first.revision + 1);

        revision.changed().await?;
        assert_eq!(*revision.borrow(), store.revision());
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_subscriber_still_sees_latest_commit() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("slow").await?;
        let events = store.subscribe().await;

        for i in 0..SUBSCRIBER_BUFFER + 50 {
            set_title(&store, &format!("title {i}")).await?;
        }
        let final_revision = store.revision();
        store.dispose().await;

        let received: Vec<StoreEvent> = events.collect().await;
        assert!(!received.is_empty() && received.len() <= SUBSCRIBER_BUFFER);
        assert_eq!(received.last().map(|e| e.revision), Some(final_revision));
        assert!(received.windows(2).all(|w| w[1].revision == w[0].revision + 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_closure_error_is_typed() -> Result<()> {
        let store = StoreFactory::in_memory().create::<TitleSchema>("err").await?;
        let err = store
            .transact(|_| -> Result<()> {
                Err(ApiError::NodeNotFound {
                    id: "k".to_string(),
                }
                .into())
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::NodeNotFound { id: "k".to_string() });
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_from_persistence() -> Result<()> {
        let factory = StoreFactory::with_memory_persistence(MemoryPersistence::new());

        let store = factory.create::<TitleSchema>("keep").await?;
        set_title(&store, "saved").await?;
        store.dispose().await;

        let reopened = factory.create::<TitleSchema>("keep").await?;
        assert_eq!(reopened.snapshot().await?.as_deref(), Some("saved"));
        Ok(())
    }

    #[tokio::test]
    async fn test_compaction_keeps_state() -> Result<()> {
        let persistence = MemoryPersistence::new();
        let factory = StoreFactory::with_memory_persistence(persistence.clone());
        let store = SyncedStore::<TitleSchema>::new(
            TitleSchema::room_id("compact"),
            Some(Arc::new(persistence.clone())),
        )?
        .with_compact_threshold(3);
        store.connect().await?;

        for i in 0..10 {
            set_title(&store, &format!("v{i}")).await?;
        }
        let stored = persistence.load("test-compact").await?;
        assert!(stored.len() <= 3, "log was not compacted: {}", stored.len());

        let reopened = factory.create::<TitleSchema>("compact").await?;
        assert_eq!(reopened.snapshot().await?.as_deref(), Some("v9"));
        Ok(())
    }

    #[tokio::test]
    async fn test_open_room_is_shared() -> Result<()> {
        let factory = StoreFactory::in_memory();
        let first = factory.create::<TitleSchema>("shared").await?;
        let mut events = first.subscribe().await;

        let second = factory.create::<TitleSchema>("shared").await?;
        set_title(&second, "from second").await?;
        assert_eq!(first.snapshot().await?.as_deref(), Some("from second"));
        assert_eq!(events.next().await.map(|e| e.revision), Some(second.revision()));

        factory.clear_room::<TitleSchema>("shared").await?;
        assert_eq!(first.status(), StoreStatus::Disposed);
        let fresh = factory.create::<TitleSchema>("shared").await?;
        assert_eq!(fresh.snapshot().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_data_leaves_nothing() -> Result<()> {
        let factory = StoreFactory::with_memory_persistence(MemoryPersistence::new());
        let store = factory.create::<TitleSchema>("wipe").await?;
        set_title(&store, "temporary").await?;

        store.clear_data().await?;
        assert_eq!(store.status(), StoreStatus::Disposed);

        let reopened = factory.create::<TitleSchema>("wipe").await?;
        assert_eq!(reopened.snapshot().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_fallback_to_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").expect("write");

        let factory = StoreFactory::sqlite_or_memory(blocker.join("boards.db"));
        assert!(!factory.is_persistent());
    }
}
