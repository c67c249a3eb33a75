//! In-memory item search.
//!
//! # Responsibility
//! - Match items by case-insensitive substring over headline and notes.
//! - Return detached copies so callers can keep results across mutations.

pub mod substring;
