//! Item store and refresh notification protocol.
//!
//! # Responsibility
//! - Keep the principal's items in memory, synchronized with a backend.
//! - Report bulk-load progress and state changes to observers.

pub mod error;
pub mod item_store;
pub mod notify;
