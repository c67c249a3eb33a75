//! Core of MyGraph, a personal item graph backed by a document store.
//! The item store here is the single authority over in-memory item state.

pub mod backend;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod search;
pub mod store;

pub use backend::{Backend, BackendError, BackendResult, MemoryBackend, SqliteBackend};
pub use config::{ConfigError, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::item::{Item, ItemId, ItemKind, ItemState, Privacy};
pub use model::profile::{Principal, UserProfile};
pub use model::record::{BackendTimestamp, Record, RecordError};
pub use search::substring::search_items;
pub use store::error::{StoreError, StoreResult};
pub use store::item_store::ItemStore;
pub use store::notify::{LatestSnapshot, LoadPhase, RefreshObserver, Snapshot, SubscriptionId};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
