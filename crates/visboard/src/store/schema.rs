use loro::LoroDoc;
use std::fmt::Debug;

/// Shape of the state held by one kind of synced store.
///
/// A schema names its root containers, knows how to materialize them in a
/// fresh document and how to project the document into a typed snapshot.
pub trait Schema: Send + Sync + 'static {
    /// Prepended to an id to form the room id (and persistence key).
    const ROOM_PREFIX: &'static str;

    /// Typed, detached view of the document.
    type Snapshot: Clone + Debug + Send + 'static;

    /// Touch the root containers so they exist before the first read.
    ///
    /// Runs inside a write transaction on every connect; must be idempotent.
    fn initialize(doc: &LoroDoc) -> anyhow::Result<()>;

    /// Read the whole document into a snapshot.
    fn project(doc: &LoroDoc) -> anyhow::Result<Self::Snapshot>;

    fn room_id(id: &str) -> String {
        format!("{}{}", Self::ROOM_PREFIX, id)
    }
}
