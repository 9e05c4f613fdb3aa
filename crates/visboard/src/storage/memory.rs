use super::{DocumentPersistence, Result, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process persistence. Clones share the same rooms, so a store reopened
/// against a clone sees what the previous instance wrote.
#[derive(Clone, Default, Debug)]
pub struct MemoryPersistence {
    rooms: Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms
            .lock()
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentPersistence for MemoryPersistence {
    async fn load(&self, room_id: &str) -> Result<Vec<Vec<u8>>> {
        let rooms = self.rooms.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(rooms.get(room_id).cloned().unwrap_or_default())
    }

    async fn append(&self, room_id: &str, update: &[u8]) -> Result<usize> {
        let mut rooms = self.rooms.lock().map_err(|_| StorageError::Poisoned)?;
        let log = rooms.entry(room_id.to_string()).or_default();
        log.push(update.to_vec());
        Ok(log.len())
    }

    async fn compact(&self, room_id: &str, snapshot: &[u8]) -> Result<()> {
        let mut rooms = self.rooms.lock().map_err(|_| StorageError::Poisoned)?;
        rooms.insert(room_id.to_string(), vec![snapshot.to_vec()]);
        Ok(())
    }

    async fn clear(&self, room_id: &str) -> Result<()> {
        let mut rooms = self.rooms.lock().map_err(|_| StorageError::Poisoned)?;
        rooms.remove(room_id);
        Ok(())
    }
}
