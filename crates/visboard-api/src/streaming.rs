use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Origin of a store change (local vs. merged from another replica).
///
/// Lets views skip echoing their own writes back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Committed by this process
    Local,
    /// Imported from persistence or another replica
    Remote,
}

/// Lifecycle of a synced store instance.
///
/// `Uninitialized → Loading → Ready → Disposed`; `Disposed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreStatus {
    /// Created, persistence not attached yet
    Uninitialized,
    /// Persistence attached, stored state being loaded
    Loading,
    /// Loaded; local commits allowed
    Ready,
    /// Persistence released, instance unusable
    Disposed,
}

impl StoreStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, StoreStatus::Ready)
    }
}

/// Notification sent to subscribers after every committed change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreEvent {
    pub room_id: String,
    /// Monotonic per-instance revision, bumped once per commit
    pub revision: u64,
    pub origin: ChangeOrigin,
}

/// Broadcast hub for store events; `None` once the store is released, which
/// ends every subscriber stream.
pub type EventSubscribers = Arc<Mutex<Option<broadcast::Sender<StoreEvent>>>>;
