//! Visual knowledge boards: a branch-and-knowledge canvas stored in Loro
//! documents, with a layered layout engine and model-driven chat flows.

pub mod ai;
pub mod board;
pub mod config;
pub mod layout;
pub mod storage;
pub mod store;
pub mod sync;
pub mod telemetry;
#[cfg(not(target_arch = "wasm32"))]
pub mod testing;

pub use board::{BoardDirectory, BoardStore};
pub use config::{Settings, UiMode};
pub use layout::{LayoutError, compute_layout};
pub use store::{StoreFactory, SyncedStore};
pub use visboard_api::ApiError;
