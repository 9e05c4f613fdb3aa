//! SQLite-backed room persistence
//!
//! All rooms share one database file; each row holds one encoded update.

use super::{DocumentPersistence, Result, StorageError};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const CREATE_UPDATES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS room_updates (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id TEXT NOT NULL,
        data BLOB NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_room_updates_room ON room_updates (room_id, seq);
"#;

#[derive(Clone)]
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqlitePersistence {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;
        info!("Opened room database at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_UPDATES_TABLE)?;
        Ok(())
    }

    /// Run a blocking closure against the connection off the async executor.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    fn count(conn: &Connection, room_id: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM room_updates WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl DocumentPersistence for SqlitePersistence {
    async fn load(&self, room_id: &str) -> Result<Vec<Vec<u8>>> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM room_updates WHERE room_id = ?1 ORDER BY seq")?;
            let updates = stmt
                .query_map(params![room_id], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            debug!("Loaded {} updates for room '{}'", updates.len(), room_id);
            Ok(updates)
        })
        .await
    }

    async fn append(&self, room_id: &str, update: &[u8]) -> Result<usize> {
        let room_id = room_id.to_string();
        let update = update.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO room_updates (room_id, data) VALUES (?1, ?2)",
                params![room_id, update],
            )?;
            Self::count(conn, &room_id)
        })
        .await
    }

    async fn compact(&self, room_id: &str, snapshot: &[u8]) -> Result<()> {
        let room_id = room_id.to_string();
        let snapshot = snapshot.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM room_updates WHERE room_id = ?1",
                params![room_id],
            )?;
            tx.execute(
                "INSERT INTO room_updates (room_id, data) VALUES (?1, ?2)",
                params![room_id, snapshot],
            )?;
            tx.commit()?;
            debug!("Compacted room '{}' into {} bytes", room_id, snapshot.len());
            Ok(())
        })
        .await
    }

    async fn clear(&self, room_id: &str) -> Result<()> {
        let room_id = room_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM room_updates WHERE room_id = ?1",
                params![room_id],
            )?;
            info!("Cleared room '{}' ({} updates)", room_id, removed);
            Ok(())
        })
        .await
    }
}
