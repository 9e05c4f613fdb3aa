//! Generic CRDT-backed store bound to one room.
//!
//! Every mutation goes through [`SyncedStore::transact`], which commits the
//! closure's writes as one Loro change, appends the resulting update to local
//! persistence and notifies subscribers. The raw document is never handed out
//! for writing.

use super::Schema;
use crate::storage::DocumentPersistence;
use crate::sync::CollaborativeDoc;
use futures::stream::{BoxStream, StreamExt};
use loro::{LoroDoc, VersionVector};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};
use visboard_api::{ApiError, ChangeOrigin, EventSubscribers, StoreEvent, StoreStatus};

/// Stored updates beyond this count are folded into one snapshot.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 500;

/// Events retained for a subscriber that falls behind. Older ones are
/// skipped, the newest always arrive.
pub const SUBSCRIBER_BUFFER: usize = 100;

/// Change notifications of one store.
pub type EventStream = BoxStream<'static, StoreEvent>;

pub struct SyncedStore<S: Schema> {
    room_id: String,
    doc: Arc<CollaborativeDoc>,
    persistence: Option<Arc<dyn DocumentPersistence>>,
    status: Arc<watch::Sender<StoreStatus>>,
    revision: Arc<watch::Sender<u64>>,
    subscribers: EventSubscribers,
    /// Version already written to persistence
    persisted: Arc<Mutex<VersionVector>>,
    compact_threshold: usize,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Clone for SyncedStore<S> {
    fn clone(&self) -> Self {
        Self {
            room_id: self.room_id.clone(),
            doc: self.doc.clone(),
            persistence: self.persistence.clone(),
            status: self.status.clone(),
            revision: self.revision.clone(),
            subscribers: self.subscribers.clone(),
            persisted: self.persisted.clone(),
            compact_threshold: self.compact_threshold,
            _schema: PhantomData,
        }
    }
}

/// Map a closure error back to the typed error it carries, if any.
pub(crate) fn to_api_error(e: anyhow::Error) -> ApiError {
    match e.downcast::<ApiError>() {
        Ok(api) => api,
        Err(e) => ApiError::internal(e),
    }
}

impl<S: Schema> SyncedStore<S> {
    /// Create an unconnected store for `room_id`.
    ///
    /// `persistence = None` keeps the store in memory only.
    pub fn new(
        room_id: impl Into<String>,
        persistence: Option<Arc<dyn DocumentPersistence>>,
    ) -> Result<Self, ApiError> {
        let room_id = room_id.into();
        let doc = CollaborativeDoc::new(room_id.clone()).map_err(ApiError::internal)?;
        let (status, _) = watch::channel(StoreStatus::Uninitialized);
        let (revision, _) = watch::channel(0u64);
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);

        Ok(Self {
            room_id,
            doc: Arc::new(doc),
            persistence,
            status: Arc::new(status),
            revision: Arc::new(revision),
            subscribers: Arc::new(Mutex::new(Some(events))),
            persisted: Arc::new(Mutex::new(VersionVector::default())),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            _schema: PhantomData,
        })
    }

    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold.max(1);
        self
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> StoreStatus {
        *self.status.borrow()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Attach persistence, load the stored state and become `Ready`.
    ///
    /// Connecting a ready store is a no-op.
    pub async fn connect(&self) -> Result<(), ApiError> {
        match self.status() {
            StoreStatus::Ready => return Ok(()),
            StoreStatus::Disposed => return Err(self.disposed()),
            StoreStatus::Loading => {
                return Err(ApiError::InvalidOperation {
                    message: format!("room {} is already loading", self.room_id),
                });
            }
            StoreStatus::Uninitialized => {}
        }
        self.status.send_replace(StoreStatus::Loading);

        let mut loaded = 0usize;
        if let Some(persistence) = &self.persistence {
            match persistence.load(&self.room_id).await {
                Ok(updates) => {
                    for update in &updates {
                        match self.doc.apply_update(update).await {
                            Ok(()) => loaded += 1,
                            Err(e) => warn!(
                                "Skipping unreadable update in room '{}': {}",
                                self.room_id, e
                            ),
                        }
                    }
                }
                Err(e) => warn!(
                    "Could not load room '{}', continuing in memory: {}",
                    self.room_id, e
                ),
            }
        }

        self.doc
            .with_write(|doc| S::initialize(doc))
            .await
            .map_err(to_api_error)?;

        *self.persisted.lock().await = self.doc.version().await;
        if loaded > self.compact_threshold {
            self.compact().await;
        }

        self.status.send_replace(StoreStatus::Ready);
        info!(
            "Room '{}' ready ({} stored updates, persistent: {})",
            self.room_id,
            loaded,
            self.is_persistent()
        );
        if loaded > 0 {
            self.notify(ChangeOrigin::Remote).await;
        }
        Ok(())
    }

    /// Wait until the store is `Ready`; fails if it gets disposed instead.
    pub async fn wait_ready(&self) -> Result<(), ApiError> {
        let mut rx = self.status.subscribe();
        let status = rx
            .wait_for(|s| matches!(s, StoreStatus::Ready | StoreStatus::Disposed))
            .await
            .map_err(ApiError::internal)?;
        match *status {
            StoreStatus::Ready => Ok(()),
            _ => Err(self.disposed()),
        }
    }

    /// Current typed projection of the document.
    pub async fn snapshot(&self) -> Result<S::Snapshot, ApiError> {
        self.read(|doc| S::project(doc)).await
    }

    /// Run a read-only closure against the document.
    pub async fn read<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&LoroDoc) -> anyhow::Result<R>,
    {
        if self.status() == StoreStatus::Disposed {
            return Err(self.disposed());
        }
        self.doc.with_read(f).await.map_err(to_api_error)
    }

    /// Apply a group of writes as one transaction.
    pub async fn transact<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&LoroDoc) -> anyhow::Result<R>,
    {
        self.ensure_ready()?;
        let result = self.doc.with_write(f).await;
        // Loro cannot roll back, so whatever was applied is persisted either way.
        self.persist().await;
        self.notify(ChangeOrigin::Local).await;
        result.map_err(to_api_error)
    }

    /// Merge an update or snapshot from another replica.
    pub async fn merge_update(&self, update: &[u8]) -> Result<(), ApiError> {
        self.ensure_ready()?;
        self.doc
            .apply_update(update)
            .await
            .map_err(|e| ApiError::InvalidOperation {
                message: format!("rejected update for room {}: {}", self.room_id, e),
            })?;
        self.persist().await;
        self.notify(ChangeOrigin::Remote).await;
        Ok(())
    }

    pub async fn version(&self) -> VersionVector {
        self.doc.version().await
    }

    /// Encode the operations another replica at `since` is missing.
    pub async fn export_update(&self, since: &VersionVector) -> Result<Vec<u8>, ApiError> {
        self.doc
            .export_updates_since(since)
            .await
            .map_err(ApiError::internal)
    }

    pub async fn export_snapshot(&self) -> Result<Vec<u8>, ApiError> {
        self.doc.export_snapshot().await.map_err(ApiError::internal)
    }

    /// Stream of change notifications, one per commit.
    ///
    /// A subscriber more than [`SUBSCRIBER_BUFFER`] events behind skips the
    /// oldest ones but still receives the latest, so the last event seen
    /// always carries the current revision. The stream ends when the store is
    /// disposed.
    pub async fn subscribe(&self) -> EventStream {
        let rx = match self.subscribers.lock().await.as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        };
        let room_id = self.room_id.clone();
        BroadcastStream::new(rx)
            .filter_map(move |item| {
                let event = match item {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!("Subscriber of '{}' skipped {} events", room_id, skipped);
                        None
                    }
                };
                futures::future::ready(event)
            })
            .boxed()
    }

    /// Revision counter that changes after every commit.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Release the store. Subscriber streams end; stored data is kept.
    pub async fn dispose(&self) {
        if self.status() == StoreStatus::Disposed {
            return;
        }
        self.persist().await;
        self.status.send_replace(StoreStatus::Disposed);
        self.subscribers.lock().await.take();
        info!("Room '{}' disposed", self.room_id);
    }

    /// Wipe the local copy of the room and dispose the store.
    pub async fn clear_data(&self) -> Result<(), ApiError> {
        self.status.send_replace(StoreStatus::Disposed);
        self.subscribers.lock().await.take();
        if let Some(persistence) = &self.persistence {
            persistence.clear(&self.room_id).await?;
        }
        info!("Room '{}' cleared", self.room_id);
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ApiError> {
        match self.status() {
            StoreStatus::Ready => Ok(()),
            StoreStatus::Disposed => Err(self.disposed()),
            _ => Err(ApiError::StoreNotReady {
                room_id: self.room_id.clone(),
            }),
        }
    }

    fn disposed(&self) -> ApiError {
        ApiError::StoreDisposed {
            room_id: self.room_id.clone(),
        }
    }

    /// Append everything not yet persisted. Storage failures only degrade
    /// durability, so they are logged rather than returned.
    async fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let mut persisted = self.persisted.lock().await;
        let current = self.doc.version().await;
        if *persisted == current {
            return;
        }

        let update = match self.doc.export_updates_since(&persisted).await {
            Ok(update) => update,
            Err(e) => {
                warn!("Failed to export update for room '{}': {}", self.room_id, e);
                return;
            }
        };

        match persistence.append(&self.room_id, &update).await {
            Ok(count) => {
                debug!(
                    "Persisted {} bytes to room '{}' ({} stored updates)",
                    update.len(),
                    self.room_id,
                    count
                );
                *persisted = current;
                drop(persisted);
                if count > self.compact_threshold {
                    self.compact().await;
                }
            }
            Err(e) => warn!("Failed to persist room '{}': {}", self.room_id, e),
        }
    }

    async fn compact(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let result = match self.doc.export_snapshot().await {
            Ok(snapshot) => persistence
                .compact(&self.room_id, &snapshot)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                *self.persisted.lock().await = self.doc.version().await;
                debug!("Compacted room '{}'", self.room_id);
            }
            Err(e) => warn!("Failed to compact room '{}': {}", self.room_id, e),
        }
    }

    async fn notify(&self, origin: ChangeOrigin) {
        let mut next = 0;
        self.revision.send_modify(|rev| {
            *rev += 1;
            next = *rev;
        });

        let event = StoreEvent {
            room_id: self.room_id.clone(),
            revision: next,
            origin,
        };
        if let Some(events) = self.subscribers.lock().await.as_ref() {
            // no receivers is not an error
            let _ = events.send(event);
        }
    }
}
