//! Board documents and the board directory
//!
//! - `schema`: container layout of a board room and its typed projection
//! - `store`: `BoardStore`, every mutation the canvas performs
//! - `service`: content of a freshly created board
//! - `directory`: the global room listing boards

pub mod directory;
pub mod schema;
pub mod service;
pub mod store;

pub use directory::{BoardDirectory, DirectorySchema};
pub use schema::{BoardSchema, BoardSnapshot};
pub use service::BoardService;
pub use store::BoardStore;

use rand::Rng;
use rand::distributions::Alphanumeric;

const ID_LEN: usize = 10;

/// Random alphanumeric id for nodes, messages, edges and boards.
pub fn make_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_id_shape() {
        let a = make_id();
        let b = make_id();
        assert_eq!(a.len(), ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
