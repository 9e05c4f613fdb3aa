//! Synchronization infrastructure
//!
//! - `collaborative_doc`: Loro document wrapper with transactional writes
//!   and update export/import for replication

pub mod collaborative_doc;

pub use collaborative_doc::*;
