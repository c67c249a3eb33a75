//! Linear substring search over the item mapping.
//!
//! # Invariants
//! - Matching runs against `headline` immediately followed by `notes`.
//! - Blank query text matches every item.
//! - Results are new mappings, never views into the store.

use crate::model::item::{Item, ItemId};
use std::collections::HashMap;

/// Returns every item whose `headline + notes` contains `text`, ignoring case.
pub fn search_items(items: &HashMap<ItemId, Item>, text: &str) -> HashMap<ItemId, Item> {
    let needle = text.to_lowercase();
    items
        .iter()
        .filter(|(_, item)| matches_text(item, &needle))
        .map(|(id, item)| (id.clone(), item.clone()))
        .collect()
}

/// `needle` must already be lowercased.
fn matches_text(item: &Item, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let mut haystack = String::with_capacity(item.headline.len() + item.notes.len());
    haystack.push_str(&item.headline);
    haystack.push_str(&item.notes);
    haystack.to_lowercase().contains(needle)
}
