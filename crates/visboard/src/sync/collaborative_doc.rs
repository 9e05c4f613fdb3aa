use anyhow::Result;
use loro::{ExportMode, LoroDoc, PeerID, VersionVector};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Loro document shared by every view of one room.
///
/// Local-only: replication happens by exchanging the byte updates returned
/// from [`CollaborativeDoc::export_updates_since`] and feeding them to
/// [`CollaborativeDoc::apply_update`] on the other side.
pub struct CollaborativeDoc {
    doc: Arc<RwLock<LoroDoc>>,
    peer_id: PeerID,
    doc_id: String,
}

impl CollaborativeDoc {
    /// Create an empty document with a random peer id.
    pub fn new(doc_id: impl Into<String>) -> Result<Self> {
        Self::with_peer_id(doc_id, rand::random::<u64>())
    }

    pub fn with_peer_id(doc_id: impl Into<String>, peer_id: PeerID) -> Result<Self> {
        let doc_id = doc_id.into();
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)?;

        info!("Created local doc '{}' with peer_id: {}", doc_id, peer_id);

        Ok(Self {
            doc: Arc::new(RwLock::new(doc)),
            peer_id,
            doc_id,
        })
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn peer_id(&self) -> PeerID {
        self.peer_id
    }

    /// Import an update or snapshot produced by another replica.
    pub async fn apply_update(&self, update: &[u8]) -> Result<()> {
        let doc = self.doc.write().await;
        doc.import(update)?;
        debug!("Applied update of {} bytes to '{}'", update.len(), self.doc_id);
        Ok(())
    }

    pub async fn export_snapshot(&self) -> Result<Vec<u8>> {
        let doc = self.doc.read().await;
        Ok(doc.export(ExportMode::Snapshot)?)
    }

    /// Current operation-log version.
    pub async fn version(&self) -> VersionVector {
        self.doc.read().await.oplog_vv()
    }

    /// Encode every operation not covered by `since`.
    pub async fn export_updates_since(&self, since: &VersionVector) -> Result<Vec<u8>> {
        let doc = self.doc.read().await;
        Ok(doc.export(ExportMode::updates(since))?)
    }

    /// Execute a read-only operation on the document.
    pub async fn with_read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LoroDoc) -> Result<R>,
    {
        let doc = self.doc.read().await;
        f(&doc)
    }

    /// Execute a write operation as one transaction.
    ///
    /// Every mutation made by `f` is committed as a single change, so other
    /// replicas and observers see the whole group or nothing. Loro has no
    /// rollback: operations applied before an error are still committed.
    pub async fn with_write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LoroDoc) -> Result<R>,
    {
        let doc = self.doc.write().await;
        let result = f(&doc);
        doc.commit();

        if let Err(e) = &result {
            warn!("Write on '{}' failed after partial apply: {}", self.doc_id, e);
        }
        result
    }
}
