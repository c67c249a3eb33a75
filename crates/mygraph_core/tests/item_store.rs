mod common;

use chrono::{Duration, Utc};
use common::{ada, minimal_record, signed_in_store, wait_until, SnapshotLog};
use mygraph_core::{
    Item, ItemId, ItemState, ItemStore, LatestSnapshot, LoadPhase, MemoryBackend, Principal,
    Privacy, Record, StoreConfig, StoreError,
};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn create_item_writes_through_inserts_and_notifies() {
    let (backend, store, log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let before = log.len();

    let id = store.create_item("X").await.unwrap();

    let mut item = store.get_item(&id).expect("created item is in the mapping");
    assert_eq!(item.headline, "X");
    assert_eq!(item.state(), ItemState::Active);
    assert_eq!(item.privacy, Privacy::Personal);
    assert!(backend.item_record(&ada().id, id.as_str()).is_some());

    assert_eq!(log.len(), before + 1);
    let last = log.snapshots().pop().unwrap();
    assert!(last.items.contains_key(&id));
}

#[tokio::test(start_paused = true)]
async fn created_ids_are_fresh() {
    let (_backend, store, _log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();

    let first = store.create_item("same").await.unwrap();
    let second = store.create_item("same").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(store.items().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_create_is_not_inserted() {
    let (backend, store, log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let before = log.len();
    backend.set_fail_writes(true);

    let err = store.create_item("lost").await.unwrap_err();

    assert!(matches!(err, StoreError::WriteFailure { .. }));
    assert!(store.items().is_empty());
    assert_eq!(log.len(), before);
}

#[tokio::test(start_paused = true)]
async fn update_item_overwrites_record_without_notifying() {
    let (backend, store, log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let id = store.create_item("draft").await.unwrap();
    let before = log.len();

    let mut item = store.get_item(&id).unwrap();
    item.headline = "final".to_string();
    item.notes = "with notes".to_string();
    item.priority = 5;
    store.update_item(&item).await.unwrap();

    assert_eq!(log.len(), before);
    assert_eq!(store.get_item(&id).unwrap().headline, "final");
    let stored = backend.item_record(&ada().id, id.as_str()).unwrap();
    assert_eq!(stored["notes"], "with notes");
    assert_eq!(stored["priority"], 5);

    store.refresh().await;
    assert_eq!(log.len(), before + 1);
    assert_eq!(log.snapshots().pop().unwrap().items[&id].headline, "final");
}

#[tokio::test(start_paused = true)]
async fn failed_update_keeps_previous_item() {
    let (backend, store, _log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let id = store.create_item("original").await.unwrap();
    let previous = store.get_item(&id).unwrap();
    backend.set_fail_writes(true);

    let mut edited = previous.clone();
    edited.headline = "edited".to_string();
    let err = store.update_item(&edited).await.unwrap_err();

    assert!(matches!(err, StoreError::WriteFailure { ref item_id, .. } if *item_id == id));
    assert_eq!(store.get_item(&id).unwrap(), previous);
    let stored = backend.item_record(&ada().id, id.as_str()).unwrap();
    assert_eq!(stored["headline"], "original");
}

#[tokio::test(start_paused = true)]
async fn update_of_unknown_item_is_rejected() {
    let (backend, store, _log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();

    let stranger = Item::new("not in store");
    let err = store.update_item(&stranger).await.unwrap_err();
    assert!(matches!(err, StoreError::ItemNotFound(_)));
    assert_eq!(backend.item_write_count(), 0);
}

#[tokio::test]
async fn writes_without_principal_are_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ItemStore::new(Arc::clone(&backend));
    store.initialize().await.unwrap();

    let err = store.create_item("nobody").await.unwrap_err();
    assert!(matches!(err, StoreError::NotAuthenticated));
    let err = store.update_item(&Item::new("nobody")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotAuthenticated));
    assert_eq!(backend.item_write_count(), 0);
}

#[tokio::test]
async fn sign_in_before_initialize_fails() {
    let store = ItemStore::new(Arc::new(MemoryBackend::with_principal(ada())));
    let err = store.sign_in().await.unwrap_err();
    assert!(matches!(err, StoreError::NotInitialized));
}

#[tokio::test]
async fn initialize_twice_fails() {
    let store = ItemStore::new(Arc::new(MemoryBackend::new()));
    store.initialize().await.unwrap();
    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyInitialized));
}

#[tokio::test]
async fn unreachable_backend_fails_initialize_and_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_fail_connect(true);
    let store = ItemStore::new(Arc::clone(&backend));
    let log = Arc::new(SnapshotLog::default());
    store.subscribe(log.clone());

    let err = store.initialize().await.unwrap_err();

    assert!(matches!(err, StoreError::BackendUnavailable(_)));
    assert_eq!(store.load_phase(), LoadPhase::Failed);
    assert_eq!(log.snapshots().pop().unwrap().load_phase, LoadPhase::Failed);
    assert!(matches!(
        store.sign_in().await.unwrap_err(),
        StoreError::NotInitialized
    ));
}

#[tokio::test(start_paused = true)]
async fn sign_in_creates_profile_and_loads_items() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::with_principal(principal.clone()));
    backend.seed_item(&principal.id, "kept", minimal_record("Kept", ""));
    let store = ItemStore::new(Arc::clone(&backend));

    store.initialize().await.unwrap();
    assert!(store.current_user().is_none());
    assert_eq!(store.load_phase(), LoadPhase::NotStarted);
    assert!(store.initial_load_in_progress());

    store.sign_in().await.unwrap();

    let profile = store.current_user().unwrap();
    assert_eq!(profile.id, principal.id);
    assert_eq!(profile.display_name, principal.display_name);
    assert!(profile.signed_on);
    let stored = backend.profile_record(&principal.id).unwrap();
    assert_eq!(stored["displayName"], "Ada Lovelace");

    assert_eq!(store.load_phase(), LoadPhase::Ready);
    assert!(!store.initial_load_in_progress());
    assert_eq!(store.items_loaded(), 1);
    assert!(store
        .get_item(&ItemId::from_stored("kept"))
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn existing_profile_is_reused() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::signed_in(principal.clone()));
    let mut record = Record::new();
    record.insert("id".into(), principal.id.clone().into());
    record.insert("displayName".into(), "Countess".into());
    backend.seed_profile(&principal.id, record.clone());
    let store = ItemStore::new(Arc::clone(&backend));

    store.initialize().await.unwrap();

    assert_eq!(store.current_user().unwrap().display_name, "Countess");
    assert_eq!(backend.profile_record(&principal.id).unwrap(), record);
}

#[tokio::test]
async fn cancelled_sign_in_is_an_auth_error() {
    let store = ItemStore::new(Arc::new(MemoryBackend::new()));
    store.initialize().await.unwrap();

    let err = store.sign_in().await.unwrap_err();
    assert!(matches!(err, StoreError::Auth(_)));
    assert!(store.current_user().is_none());
}

#[tokio::test(start_paused = true)]
async fn malformed_record_aborts_bulk_load() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::signed_in(principal.clone()));
    backend.seed_item(&principal.id, "a-good", minimal_record("good", ""));
    let mut broken = minimal_record("broken", "");
    broken.remove("notes");
    backend.seed_item(&principal.id, "b-broken", broken);
    backend.seed_item(&principal.id, "c-never", minimal_record("never", ""));
    let store = ItemStore::new(Arc::clone(&backend));

    let err = store.initialize().await.unwrap_err();

    match err {
        StoreError::MalformedRecord { item_id, .. } => assert_eq!(item_id.as_str(), "b-broken"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.load_phase(), LoadPhase::Failed);
    assert!(store.initial_load_in_progress());
    assert!(store
        .get_item(&ItemId::from_stored("c-never"))
        .is_none());
}

#[tokio::test]
async fn read_failure_during_session_start_is_backend_unavailable() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::signed_in(principal));
    backend.set_fail_reads(true);
    let store = ItemStore::new(Arc::clone(&backend));

    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, StoreError::BackendUnavailable(_)));
    assert_eq!(store.load_phase(), LoadPhase::Failed);
}

fn backend_with_broken_record(principal: &Principal) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::with_principal(principal.clone()));
    let mut broken = minimal_record("broken", "");
    broken.remove("notes");
    backend.seed_item(&principal.id, "a-broken", broken);
    backend
}

// The auth listener wakes on the same publication as `sign_in`; on a
// multi-thread runtime either side may reach the gate first.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_load_is_returned_from_sign_in_on_multi_thread_runtime() {
    for run in 0..100 {
        let backend = backend_with_broken_record(&ada());
        let store = ItemStore::new(Arc::clone(&backend));
        store.initialize().await.unwrap();

        match store.sign_in().await {
            Err(StoreError::MalformedRecord { item_id, .. }) => {
                assert_eq!(item_id.as_str(), "a-broken")
            }
            other => panic!("run {run}: expected MalformedRecord, got {other:?}"),
        }
        assert_eq!(store.load_phase(), LoadPhase::Failed);
    }
}

#[tokio::test(start_paused = true)]
async fn sign_in_again_retries_a_failed_load() {
    let principal = ada();
    let backend = backend_with_broken_record(&principal);
    let store = ItemStore::new(Arc::clone(&backend));
    store.initialize().await.unwrap();
    assert!(store.sign_in().await.is_err());

    backend.seed_item(&principal.id, "a-broken", minimal_record("fixed", ""));
    store.sign_in().await.unwrap();

    assert_eq!(store.load_phase(), LoadPhase::Ready);
    assert_eq!(store.items_loaded(), 1);
    assert_eq!(
        store.get_item(&ItemId::from_stored("a-broken")).unwrap().headline,
        "fixed"
    );
}

#[tokio::test(start_paused = true)]
async fn stored_ids_survive_load_and_update_byte_for_byte() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::signed_in(principal.clone()));
    backend.seed_item(&principal.id, "doc-1 ", minimal_record("padded", ""));
    let store = ItemStore::new(Arc::clone(&backend));
    store.initialize().await.unwrap();

    let ids = store.items().into_keys().collect::<Vec<_>>();
    assert_eq!(ids, vec![ItemId::from_stored("doc-1 ")]);

    let mut item = store.get_item(&ids[0]).unwrap();
    item.headline = "edited".to_string();
    store.update_item(&item).await.unwrap();

    assert_eq!(
        backend.item_record(&principal.id, "doc-1 ").unwrap()["headline"],
        "edited"
    );
    assert!(backend.item_record(&principal.id, "doc-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn search_matches_headline_and_notes_case_insensitively() {
    let (_backend, store, _log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let milk = store.create_item("Buy MILK").await.unwrap();
    let dentist = store.create_item("Dentist").await.unwrap();
    let mut with_notes = store.get_item(&dentist).unwrap();
    with_notes.notes = "ask about milk teeth".to_string();
    store.update_item(&with_notes).await.unwrap();
    store.create_item("Call mum").await.unwrap();

    let hits = store.search("Milk");
    assert_eq!(hits.len(), 2);
    assert!(hits.contains_key(&milk));
    assert!(hits.contains_key(&dentist));

    assert_eq!(store.search("").len(), 3);
    assert!(store.search("zebra").is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_park_is_reactivated_on_read_and_tick() {
    let (_backend, store, _log) = signed_in_store(ada(), 0);
    store.initialize().await.unwrap();
    let read_id = store.create_item("read me").await.unwrap();
    let tick_id = store.create_item("tick me").await.unwrap();
    let future_id = store.create_item("later").await.unwrap();

    for (id, offset) in [
        (&read_id, Duration::minutes(-5)),
        (&tick_id, Duration::minutes(-5)),
        (&future_id, Duration::days(1)),
    ] {
        let mut item = store.get_item(id).unwrap();
        item.park_until(Utc::now() + offset);
        store.update_item(&item).await.unwrap();
    }

    assert_eq!(store.get_item(&read_id).unwrap().stored_state(), ItemState::Active);
    assert_eq!(store.items()[&read_id].stored_state(), ItemState::Active);

    assert_eq!(store.items()[&tick_id].stored_state(), ItemState::Parked);
    assert_eq!(store.tick(Utc::now()), 1);
    assert_eq!(store.items()[&tick_id].stored_state(), ItemState::Active);
    assert_eq!(store.items()[&future_id].stored_state(), ItemState::Parked);
    assert_eq!(store.tick(Utc::now()), 0);
}

#[tokio::test(start_paused = true)]
async fn every_subscriber_is_notified_until_unsubscribed() {
    let (_backend, store, first) = signed_in_store(ada(), 0);
    let second = Arc::new(SnapshotLog::default());
    let latest = Arc::new(LatestSnapshot::new());
    let second_id = store.subscribe(second.clone());
    store.subscribe(latest.clone());
    store.initialize().await.unwrap();

    store.create_item("one").await.unwrap();
    assert_eq!(first.len(), second.len());

    assert!(store.unsubscribe(second_id));
    assert!(!store.unsubscribe(second_id));
    let frozen = second.len();
    store.create_item("two").await.unwrap();

    assert_eq!(second.len(), frozen);
    assert_eq!(first.len(), frozen + 1);
    assert_eq!(latest.get().unwrap().items.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn snapshot_revisions_strictly_increase() {
    let (_backend, store, log) = signed_in_store(ada(), 12);
    store.initialize().await.unwrap();
    store.create_item("more").await.unwrap();
    store.refresh().await;

    let revisions = log
        .snapshots()
        .iter()
        .map(|snapshot| snapshot.revision)
        .collect::<Vec<_>>();
    assert!(revisions.len() >= 3);
    assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(start_paused = true)]
async fn external_auth_transitions_are_followed() {
    let principal = ada();
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_item(&principal.id, "restored", minimal_record("Restored", ""));
    let store = ItemStore::new(Arc::clone(&backend));
    store.initialize().await.unwrap();

    backend.simulate_sign_in(principal.clone());
    wait_until(|| store.load_phase() == LoadPhase::Ready).await;
    assert_eq!(store.items().len(), 1);
    assert!(store.current_user().is_some());

    backend.simulate_sign_out();
    wait_until(|| store.current_user().is_none()).await;
    assert!(store.items().is_empty());
    assert_eq!(store.load_phase(), LoadPhase::NotStarted);
    assert!(store.initial_load_in_progress());
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_session_and_notifies() {
    let (_backend, store, log) = signed_in_store(ada(), 3);
    store.initialize().await.unwrap();
    assert_eq!(store.items().len(), 3);

    store.sign_out().await.unwrap();

    assert!(store.items().is_empty());
    assert!(store.current_user().is_none());
    let last = log.snapshots().pop().unwrap();
    assert!(last.items.is_empty());
    assert!(!last.user_signed_in());
    assert!(matches!(
        store.create_item("after").await.unwrap_err(),
        StoreError::NotAuthenticated
    ));
}

#[tokio::test(start_paused = true)]
async fn switching_principal_replaces_items() {
    let first = ada();
    let second = Principal::new("uid-grace", "Grace Hopper");
    let backend = Arc::new(MemoryBackend::signed_in(first.clone()));
    backend.seed_item(&first.id, "ada-1", minimal_record("Ada's", ""));
    backend.seed_item(&second.id, "grace-1", minimal_record("Grace's", ""));
    let store = ItemStore::new(Arc::clone(&backend));
    store.initialize().await.unwrap();
    assert!(store.search("Ada").len() == 1);

    backend.simulate_sign_in(second.clone());
    wait_until(|| {
        store.current_user().map(|user| user.id) == Some(second.id.clone())
            && store.load_phase() == LoadPhase::Ready
    })
    .await;

    let items = store.items();
    assert_eq!(items.len(), 1);
    assert!(items.contains_key(&ItemId::from_stored("grace-1")));
}

#[test]
fn invalid_config_is_rejected() {
    let config = StoreConfig {
        progress_interval: 0,
        ..StoreConfig::default()
    };
    let result = ItemStore::with_config(Arc::new(MemoryBackend::new()), config);
    assert!(matches!(result, Err(StoreError::Config(_))));
}
