//! Authoritative in-memory item store synchronized with a document backend.
//!
//! # Responsibility
//! - Own the id -> item mapping of the signed-in principal.
//! - Write mutations through to the backend before applying them locally.
//! - Bulk-load the principal's collection with progress notifications.
//! - Broadcast snapshots to subscribed observers.
//!
//! # Invariants
//! - The state lock is never held across an `.await`.
//! - A failed write leaves the mapping unchanged.
//! - Auth transitions are applied one at a time under `auth_gate`; an
//!   explicit `sign_in`/`sign_out` holds the gate across the backend call,
//!   so its outcome is the caller's, never the auth listener's.
//! - An active principal is reloaded only by an explicit `sign_in` after its
//!   load failed.
//! - Load phases only move forward within a session; a sign-out starts a new
//!   session at `NotStarted`.

use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::model::item::{Item, ItemId, ItemState};
use crate::model::profile::{Principal, UserProfile};
use crate::search::substring::search_items;
use crate::store::error::{StoreError, StoreResult};
use crate::store::notify::{LoadPhase, RefreshObserver, Snapshot, SubscriptionId};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct StoreState {
    items: HashMap<ItemId, Item>,
    items_loaded: usize,
    initial_load_in_progress: bool,
    current_user: Option<UserProfile>,
    principal: Option<Principal>,
    load_phase: LoadPhase,
    revision: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            items_loaded: 0,
            initial_load_in_progress: true,
            current_user: None,
            principal: None,
            load_phase: LoadPhase::NotStarted,
            revision: 0,
        }
    }

    fn reset_session(&mut self) {
        self.items.clear();
        self.items_loaded = 0;
        self.initial_load_in_progress = true;
        self.current_user = None;
        self.principal = None;
        self.load_phase = LoadPhase::NotStarted;
    }

    fn principal_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|principal| principal.id.as_str())
    }

    fn snapshot(&mut self) -> Snapshot {
        self.revision += 1;
        Snapshot {
            revision: self.revision,
            items: self.items.clone(),
            current_user: self.current_user.clone(),
            initial_load_in_progress: self.initial_load_in_progress,
            items_loaded: self.items_loaded,
            load_phase: self.load_phase,
        }
    }
}

/// Item store over a document backend `B`.
pub struct ItemStore<B: Backend> {
    backend: Arc<B>,
    config: StoreConfig,
    state: Mutex<StoreState>,
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn RefreshObserver>)>>,
    next_subscription: AtomicU64,
    auth_gate: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    connected: AtomicBool,
    auth_listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Backend> ItemStore<B> {
    /// Creates a store with default configuration.
    pub fn new(backend: Arc<B>) -> Arc<Self> {
        Self::build(backend, StoreConfig::default())
    }

    /// Creates a store with validated configuration.
    pub fn with_config(backend: Arc<B>, config: StoreConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: Arc<B>, config: StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            config,
            state: Mutex::new(StoreState::new()),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            auth_gate: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            auth_listener: Mutex::new(None),
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Registers an observer; it receives every snapshot taken afterwards.
    pub fn subscribe(&self, observer: Arc<dyn RefreshObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.observers).push((id, observer));
        id
    }

    /// Removes an observer. Returns `false` for unknown handles.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Connects the backend, starts following auth transitions, and applies
    /// the current auth state (profile ensure plus bulk load when a principal
    /// is already signed in).
    ///
    /// # Errors
    /// - `AlreadyInitialized` on a second call.
    /// - `BackendUnavailable` when the connection cannot be established or
    ///   session reads fail.
    /// - `MalformedRecord` when the bulk load hits an undecodable record.
    pub async fn initialize(self: &Arc<Self>) -> StoreResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyInitialized);
        }

        let started_at = Instant::now();
        info!(
            "event=store_init module=store status=start backend={}",
            self.backend.name()
        );

        if let Err(err) = self.backend.connect().await {
            error!(
                "event=store_init module=store status=error backend={} duration_ms={} error={}",
                self.backend.name(),
                started_at.elapsed().as_millis(),
                err
            );
            self.with_state(|state| state.load_phase = LoadPhase::Failed);
            self.notify().await;
            return Err(StoreError::BackendUnavailable(err));
        }
        self.connected.store(true, Ordering::SeqCst);

        let mut auth = self.backend.auth_state();
        let current = auth.borrow_and_update().clone();
        let listener = tokio::spawn(follow_auth(Arc::downgrade(self), auth));
        *lock(&self.auth_listener) = Some(listener);

        info!(
            "event=store_init module=store status=ok backend={} duration_ms={} signed_in={}",
            self.backend.name(),
            started_at.elapsed().as_millis(),
            current.is_some()
        );

        match current {
            Some(principal) => self.apply_auth(Some(principal)).await,
            None => {
                self.notify().await;
                Ok(())
            }
        }
    }

    /// Runs the backend's interactive sign-in and loads the principal's
    /// session before returning.
    ///
    /// Signing in again as a principal whose load failed retries the load.
    ///
    /// # Errors
    /// - `NotInitialized` before a successful backend connection.
    /// - `Auth` when the backend refuses or cancels the sign-in.
    /// - Any session start failure (`BackendUnavailable`, `MalformedRecord`,
    ///   `MalformedProfile`).
    pub async fn sign_in(&self) -> StoreResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::NotInitialized);
        }
        let _gate = self.auth_gate.lock().await;
        let principal = self.backend.sign_in().await.map_err(|err| {
            warn!("event=sign_in module=store status=error error={err}");
            StoreError::Auth(err)
        })?;

        let retry = self.with_state(|state| {
            state.principal_id() == Some(principal.id.as_str())
                && state.load_phase == LoadPhase::Failed
        });
        if retry {
            info!("event=sign_in module=store status=retry");
            self.with_state(StoreState::reset_session);
        }
        self.transition(Some(principal)).await
    }

    /// Signs out through the backend and clears the session.
    pub async fn sign_out(&self) -> StoreResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::NotInitialized);
        }
        let _gate = self.auth_gate.lock().await;
        self.backend.sign_out().await.map_err(StoreError::Auth)?;
        self.transition(None).await
    }

    /// Creates an item, writes it through, then inserts it and notifies.
    ///
    /// # Errors
    /// - `NotAuthenticated` without a signed-in principal.
    /// - `WriteFailure` when the backend rejects the write; nothing is
    ///   inserted locally.
    pub async fn create_item(&self, headline: impl Into<String>) -> StoreResult<ItemId> {
        let principal_id = self.require_principal()?;
        let item = Item::new(headline);
        let item_id = item.id().clone();

        self.write_through(&principal_id, &item).await?;
        self.with_state(|state| {
            if state.principal_id() == Some(principal_id.as_str()) {
                state.items.insert(item_id.clone(), item);
            }
        });
        debug!("event=item_create module=store status=ok item_id={item_id}");

        self.notify().await;
        Ok(item_id)
    }

    /// Overwrites the stored record of a known item with `item`'s fields.
    ///
    /// Does not notify observers; call [`ItemStore::refresh`] afterwards.
    ///
    /// # Errors
    /// - `NotAuthenticated` without a signed-in principal.
    /// - `ItemNotFound` when the id is not in the mapping.
    /// - `WriteFailure` when the backend rejects the write; the in-memory
    ///   item keeps its previous value.
    pub async fn update_item(&self, item: &Item) -> StoreResult<()> {
        let principal_id = self.require_principal()?;
        if !self.with_state(|state| state.items.contains_key(item.id())) {
            return Err(StoreError::ItemNotFound(item.id().clone()));
        }

        self.write_through(&principal_id, item).await?;
        self.with_state(|state| {
            if state.principal_id() == Some(principal_id.as_str()) {
                state.items.insert(item.id().clone(), item.clone());
            }
        });
        debug!(
            "event=item_update module=store status=ok item_id={}",
            item.id()
        );
        Ok(())
    }

    /// Delivers a fresh snapshot to every observer.
    pub async fn refresh(&self) {
        self.notify().await;
    }

    /// Case-insensitive substring search over headline and notes.
    pub fn search(&self, text: &str) -> HashMap<ItemId, Item> {
        self.with_state(|state| search_items(&state.items, text))
    }

    /// Returns one item with parked expiry applied (and kept) at read time.
    pub fn get_item(&self, id: &ItemId) -> Option<Item> {
        let now = Utc::now();
        self.with_state(|state| {
            state.items.get_mut(id).map(|item| {
                item.state_at(now);
                item.clone()
            })
        })
    }

    /// Copy of the current mapping.
    pub fn items(&self) -> HashMap<ItemId, Item> {
        self.with_state(|state| state.items.clone())
    }

    /// Applies parked expiry to every item; returns how many were reactivated.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        self.with_state(|state| {
            let mut reactivated = 0;
            for item in state.items.values_mut() {
                if item.stored_state() == ItemState::Parked && item.state_at(now) != ItemState::Parked
                {
                    reactivated += 1;
                }
            }
            reactivated
        })
    }

    pub fn load_phase(&self) -> LoadPhase {
        self.with_state(|state| state.load_phase)
    }

    pub fn items_loaded(&self) -> usize {
        self.with_state(|state| state.items_loaded)
    }

    pub fn initial_load_in_progress(&self) -> bool {
        self.with_state(|state| state.initial_load_in_progress)
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.with_state(|state| state.current_user.clone())
    }

    fn with_state<R>(&self, work: impl FnOnce(&mut StoreState) -> R) -> R {
        work(&mut lock(&self.state))
    }

    fn require_principal(&self) -> StoreResult<String> {
        self.with_state(|state| state.principal_id().map(str::to_string))
            .ok_or(StoreError::NotAuthenticated)
    }

    async fn write_through(&self, principal_id: &str, item: &Item) -> StoreResult<()> {
        let record = item.to_record();
        self.backend
            .put_item(principal_id, item.id(), &record)
            .await
            .map_err(|source| {
                warn!(
                    "event=item_write module=store status=error item_id={} error={}",
                    item.id(),
                    source
                );
                StoreError::WriteFailure {
                    item_id: item.id().clone(),
                    source,
                }
            })
    }

    async fn notify(&self) {
        let snapshot = Arc::new(self.with_state(StoreState::snapshot));
        let observers = lock(&self.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect::<Vec<_>>();
        for observer in observers {
            observer.on_refresh(Arc::clone(&snapshot)).await;
        }
    }

    async fn apply_auth(&self, principal: Option<Principal>) -> StoreResult<()> {
        let _gate = self.auth_gate.lock().await;
        self.transition(principal).await
    }

    // Caller holds `auth_gate`.
    async fn transition(&self, principal: Option<Principal>) -> StoreResult<()> {
        let active = self.with_state(|state| state.principal_id().map(str::to_string));

        match principal {
            Some(principal) if active.as_deref() == Some(principal.id.as_str()) => Ok(()),
            Some(principal) => {
                if active.is_some() {
                    self.with_state(StoreState::reset_session);
                }
                self.start_session(principal).await
            }
            None if active.is_none() => Ok(()),
            None => {
                self.with_state(StoreState::reset_session);
                info!("event=sign_out module=store status=ok");
                self.notify().await;
                Ok(())
            }
        }
    }

    async fn start_session(&self, principal: Principal) -> StoreResult<()> {
        self.with_state(|state| state.principal = Some(principal.clone()));
        info!("event=sign_in module=store status=ok");

        let profile = match self.ensure_profile(&principal).await {
            Ok(profile) => profile,
            Err(err) => return self.fail_load(err).await,
        };
        self.with_state(|state| state.current_user = Some(profile));
        self.bulk_load(&principal).await
    }

    async fn ensure_profile(&self, principal: &Principal) -> StoreResult<UserProfile> {
        let stored = self
            .backend
            .get_profile(&principal.id)
            .await
            .map_err(StoreError::BackendUnavailable)?;

        if let Some(record) = stored {
            return UserProfile::from_record(principal, &record).map_err(|source| {
                StoreError::MalformedProfile {
                    principal_id: principal.id.clone(),
                    source,
                }
            });
        }

        let profile = UserProfile::for_principal(principal, Utc::now());
        self.backend
            .put_profile(&principal.id, &profile.to_record())
            .await
            .map_err(StoreError::BackendUnavailable)?;
        info!("event=profile_create module=store status=ok");
        Ok(profile)
    }

    async fn bulk_load(&self, principal: &Principal) -> StoreResult<()> {
        let started_at = Instant::now();
        self.with_state(|state| {
            state.load_phase = LoadPhase::Loading;
            state.items_loaded = 0;
            state.initial_load_in_progress = true;
        });
        info!("event=bulk_load module=store status=start");

        let records = match self.backend.fetch_items(&principal.id).await {
            Ok(records) => records,
            Err(err) => return self.fail_load(StoreError::BackendUnavailable(err)).await,
        };

        let interval = self.config.progress_interval.max(1) as usize;
        for (item_id, record) in records {
            let item = match Item::from_record(&item_id, &record) {
                Ok(item) => item,
                Err(source) => {
                    return self
                        .fail_load(StoreError::MalformedRecord { item_id, source })
                        .await
                }
            };
            let loaded = self.with_state(|state| {
                state.items.insert(item_id, item);
                state.items_loaded += 1;
                state.items_loaded
            });
            if loaded % interval == 0 {
                debug!("event=bulk_load module=store status=progress items_loaded={loaded}");
                self.notify().await;
            }
        }

        self.with_state(|state| state.load_phase = LoadPhase::Settling);
        tokio::time::sleep(self.config.settle_delay).await;

        let loaded = self.with_state(|state| {
            state.initial_load_in_progress = false;
            state.load_phase = LoadPhase::Ready;
            state.items_loaded
        });
        info!(
            "event=bulk_load module=store status=ok items_loaded={} duration_ms={}",
            loaded,
            started_at.elapsed().as_millis()
        );
        self.notify().await;
        Ok(())
    }

    async fn fail_load(&self, err: StoreError) -> StoreResult<()> {
        error!("event=bulk_load module=store status=error error={err}");
        self.with_state(|state| state.load_phase = LoadPhase::Failed);
        self.notify().await;
        Err(err)
    }
}

impl<B: Backend> Drop for ItemStore<B> {
    fn drop(&mut self) {
        if let Some(listener) = lock(&self.auth_listener).take() {
            listener.abort();
        }
    }
}

async fn follow_auth<B: Backend>(
    store: Weak<ItemStore<B>>,
    mut auth: watch::Receiver<Option<Principal>>,
) {
    while auth.changed().await.is_ok() {
        let principal = auth.borrow_and_update().clone();
        let Some(store) = store.upgrade() else {
            break;
        };
        if let Err(err) = store.apply_auth(principal).await {
            warn!("event=auth_transition module=store status=error error={err}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
