//! Domain model for items and principals.
//!
//! # Responsibility
//! - Define canonical data structures used by the item store.
//! - Own the document codec between domain types and backend records.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId`.
//! - Decoding reports typed errors instead of silently dropping fields.

pub mod item;
pub mod profile;
pub mod record;
