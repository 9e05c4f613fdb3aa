use super::Result;
use async_trait::async_trait;

/// Durable home of a room's document updates.
///
/// Rooms are independent partitions; a board id doubles as the key.
#[async_trait]
pub trait DocumentPersistence: Send + Sync {
    /// Load every stored update of a room in append order.
    ///
    /// An unknown room yields an empty list.
    async fn load(&self, room_id: &str) -> Result<Vec<Vec<u8>>>;

    /// Append one incremental update and return the room's update count.
    async fn append(&self, room_id: &str, update: &[u8]) -> Result<usize>;

    /// Replace all stored updates of a room with one snapshot.
    async fn compact(&self, room_id: &str, snapshot: &[u8]) -> Result<()>;

    /// Wipe the local copy of a room.
    async fn clear(&self, room_id: &str) -> Result<()>;
}
