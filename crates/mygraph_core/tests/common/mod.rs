#![allow(dead_code)]

use async_trait::async_trait;
use mygraph_core::{
    BackendTimestamp, ItemStore, MemoryBackend, Principal, Record, RefreshObserver, Snapshot,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Observer that keeps every delivered snapshot with its delivery time.
#[derive(Default)]
pub struct SnapshotLog {
    entries: Mutex<Vec<(Instant, Arc<Snapshot>)>>,
}

impl SnapshotLog {
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, snapshot)| Arc::clone(snapshot))
            .collect()
    }

    pub fn entries(&self) -> Vec<(Instant, Arc<Snapshot>)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl RefreshObserver for SnapshotLog {
    async fn on_refresh(&self, snapshot: Arc<Snapshot>) {
        self.entries.lock().unwrap().push((Instant::now(), snapshot));
    }
}

pub fn ada() -> Principal {
    Principal::new("uid-ada", "Ada Lovelace")
}

pub fn timestamp(seconds: i64) -> serde_json::Value {
    serde_json::to_value(BackendTimestamp {
        seconds,
        nanoseconds: 0,
    })
    .unwrap()
}

/// Minimal stored record: only the mandatory fields.
pub fn minimal_record(headline: &str, notes: &str) -> Record {
    json!({
        "headline": headline,
        "notes": notes,
        "createdAt": timestamp(1_594_857_600),
        "updatedAt": timestamp(1_594_857_600),
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub fn seed_items(backend: &MemoryBackend, principal: &Principal, count: usize) {
    for index in 0..count {
        backend.seed_item(
            &principal.id,
            &format!("item-{index:03}"),
            minimal_record(&format!("Seeded item {index}"), ""),
        );
    }
}

/// Store over a memory backend that is already signed in as `principal`,
/// with a recording observer attached.
pub fn signed_in_store(
    principal: Principal,
    seed: usize,
) -> (Arc<MemoryBackend>, Arc<ItemStore<MemoryBackend>>, Arc<SnapshotLog>) {
    let backend = Arc::new(MemoryBackend::signed_in(principal.clone()));
    seed_items(&backend, &principal, seed);
    let store = ItemStore::new(Arc::clone(&backend));
    let log = Arc::new(SnapshotLog::default());
    store.subscribe(log.clone());
    (backend, store, log)
}

/// Polls `condition` on virtual time until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 10s of virtual time");
}
