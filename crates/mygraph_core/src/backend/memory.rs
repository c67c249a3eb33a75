//! In-process backend emulator.
//!
//! # Responsibility
//! - Hold document collections in memory behind the `Backend` contract.
//! - Simulate identity-provider transitions and injected failures.
//!
//! # Invariants
//! - Every call except `auth_state` fails with `NotConnected` before
//!   `connect` succeeds.
//! - An injected write failure leaves stored documents unchanged.

use crate::backend::{items_collection, Backend, BackendError, BackendResult, USERS_COLLECTION};
use crate::model::item::ItemId;
use crate::model::profile::Principal;
use crate::model::record::Record;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Collections = HashMap<String, BTreeMap<String, Record>>;

/// Memory-backed document store with a scriptable identity provider.
pub struct MemoryBackend {
    collections: Mutex<Collections>,
    auth_tx: watch::Sender<Option<Principal>>,
    sign_in_as: Mutex<Option<Principal>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    item_writes: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty, signed-out backend whose sign-in flow is refused.
    pub fn new() -> Self {
        let (auth_tx, _) = watch::channel(None);
        Self {
            collections: Mutex::new(HashMap::new()),
            auth_tx,
            sign_in_as: Mutex::new(None),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            item_writes: AtomicUsize::new(0),
        }
    }

    /// Backend whose interactive sign-in yields `principal`.
    pub fn with_principal(principal: Principal) -> Self {
        let backend = Self::new();
        *lock(&backend.sign_in_as) = Some(principal);
        backend
    }

    /// Backend with `principal` already signed in (restored session).
    pub fn signed_in(principal: Principal) -> Self {
        let backend = Self::with_principal(principal.clone());
        backend.auth_tx.send_replace(Some(principal));
        backend
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Publishes a sign-in that did not go through `sign_in`.
    pub fn simulate_sign_in(&self, principal: Principal) {
        self.auth_tx.send_replace(Some(principal));
    }

    /// Publishes a sign-out that did not go through `sign_out`.
    pub fn simulate_sign_out(&self) {
        self.auth_tx.send_replace(None);
    }

    /// Stores an item document directly, bypassing failure injection.
    pub fn seed_item(&self, principal_id: &str, item_id: &str, record: Record) {
        lock(&self.collections)
            .entry(items_collection(principal_id))
            .or_default()
            .insert(item_id.to_string(), record);
    }

    /// Stores a profile document directly, bypassing failure injection.
    pub fn seed_profile(&self, principal_id: &str, record: Record) {
        lock(&self.collections)
            .entry(USERS_COLLECTION.to_string())
            .or_default()
            .insert(principal_id.to_string(), record);
    }

    pub fn item_record(&self, principal_id: &str, item_id: &str) -> Option<Record> {
        lock(&self.collections)
            .get(&items_collection(principal_id))
            .and_then(|docs| docs.get(item_id))
            .cloned()
    }

    pub fn profile_record(&self, principal_id: &str) -> Option<Record> {
        lock(&self.collections)
            .get(USERS_COLLECTION)
            .and_then(|docs| docs.get(principal_id))
            .cloned()
    }

    /// Number of successful item writes.
    pub fn item_write_count(&self) -> usize {
        self.item_writes.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> BackendResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }

    fn check_read(&self) -> BackendResult<()> {
        self.ensure_connected()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Storage("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> BackendResult<()> {
        self.ensure_connected()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Storage("injected write failure".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> BackendResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "injected connection failure".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<Option<Principal>> {
        self.auth_tx.subscribe()
    }

    async fn sign_in(&self) -> BackendResult<Principal> {
        self.ensure_connected()?;
        let principal = lock(&self.sign_in_as)
            .clone()
            .ok_or_else(|| BackendError::Auth("sign-in flow was cancelled".to_string()))?;
        self.auth_tx.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.ensure_connected()?;
        self.auth_tx.send_replace(None);
        Ok(())
    }

    async fn get_profile(&self, principal_id: &str) -> BackendResult<Option<Record>> {
        self.check_read()?;
        Ok(self.profile_record(principal_id))
    }

    async fn put_profile(&self, principal_id: &str, record: &Record) -> BackendResult<()> {
        self.check_write()?;
        self.seed_profile(principal_id, record.clone());
        Ok(())
    }

    async fn fetch_items(&self, principal_id: &str) -> BackendResult<Vec<(ItemId, Record)>> {
        self.check_read()?;
        let collections = lock(&self.collections);
        Ok(collections
            .get(&items_collection(principal_id))
            .map(|docs| {
                docs.iter()
                    .map(|(id, record)| (ItemId::from_stored(id.as_str()), record.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_item(
        &self,
        principal_id: &str,
        item_id: &ItemId,
        record: &Record,
    ) -> BackendResult<()> {
        self.check_write()?;
        self.seed_item(principal_id, item_id.as_str(), record.clone());
        self.item_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
