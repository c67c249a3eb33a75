//! Refresh notification protocol between the item store and its observers.
//!
//! # Responsibility
//! - Define the snapshot delivered on every observable store change.
//! - Define the observer contract and subscription handles.
//!
//! # Invariants
//! - `Snapshot::revision` strictly increases with every snapshot taken by
//!   one store; observers resolve out-of-order deliveries by keeping the
//!   highest revision.
//! - Snapshots are immutable copies; observers never see live store state.

use crate::model::item::{Item, ItemId};
use crate::model::profile::UserProfile;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Progress of the per-session bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    NotStarted,
    Loading,
    /// Collection fetched; waiting out the settle delay.
    Settling,
    Ready,
    /// Load aborted; not retried within the session.
    Failed,
}

impl LoadPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Loading => "loading",
            Self::Settling => "settling",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time copy of the store's observable state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: u64,
    pub items: HashMap<ItemId, Item>,
    pub current_user: Option<UserProfile>,
    pub initial_load_in_progress: bool,
    pub items_loaded: usize,
    pub load_phase: LoadPhase,
}

impl Snapshot {
    /// Whether a principal with a signed-on profile is present.
    pub fn user_signed_in(&self) -> bool {
        self.current_user
            .as_ref()
            .is_some_and(|profile| profile.signed_on)
    }
}

/// Receives store snapshots. The store awaits each call before moving on to
/// the next subscriber.
#[async_trait]
pub trait RefreshObserver: Send + Sync {
    async fn on_refresh(&self, snapshot: Arc<Snapshot>);
}

/// Handle returned by `ItemStore::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// Observer that keeps the newest snapshot by revision.
#[derive(Default)]
pub struct LatestSnapshot {
    latest: Mutex<Option<Arc<Snapshot>>>,
}

impl LatestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores `snapshot` unless a newer revision was already delivered.
    /// Returns whether it was kept.
    pub fn offer(&self, snapshot: Arc<Snapshot>) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = latest
            .as_ref()
            .is_some_and(|current| current.revision >= snapshot.revision);
        if stale {
            return false;
        }
        *latest = Some(snapshot);
        true
    }
}

#[async_trait]
impl RefreshObserver for LatestSnapshot {
    async fn on_refresh(&self, snapshot: Arc<Snapshot>) {
        self.offer(snapshot);
    }
}
