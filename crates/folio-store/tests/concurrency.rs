//! Several independent store handles (standing in for separate processes)
//! racing on one store file.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use folio_store::{
    FileBackend, IdempotencyStore, LockConfig, Lookup, Reservation, StoreConfig, StoreEntry,
};
use serde_json::json;

const KEY: &str = "block.append:14620000:0f3a9c";
const CMD: &str = "block.append";
const HASH: &str = "5e1b";

fn open_store(path: &std::path::Path) -> IdempotencyStore {
    let lock = LockConfig {
        wait: Duration::from_secs(10),
        ..LockConfig::default()
    };
    let backend = FileBackend::open(path, lock).unwrap();
    IdempotencyStore::open(backend, StoreConfig::default())
}

#[test]
fn concurrent_reserve_yields_exactly_one_execute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotency.json");
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = open_store(&path);
                barrier.wait();
                store.reserve(KEY, CMD, HASH).unwrap()
            })
        })
        .collect();

    let results: Vec<Reservation> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let executes = results.iter().filter(|r| **r == Reservation::Execute).count();
    let pending = results.iter().filter(|r| **r == Reservation::Pending).count();
    assert_eq!(executes, 1, "results: {results:?}");
    assert_eq!(pending, contenders - 1);
}

#[test]
fn waiters_observe_replay_after_owner_completes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotency.json");

    let owner = open_store(&path);
    assert_eq!(owner.reserve(KEY, CMD, HASH).unwrap(), Reservation::Execute);

    let other = open_store(&path);
    assert_eq!(other.lookup(KEY, CMD, HASH).unwrap(), Lookup::Pending);

    owner.complete(KEY, CMD, HASH, &json!({ "id": "b-1" })).unwrap();
    assert_eq!(
        other.reserve(KEY, CMD, HASH).unwrap(),
        Reservation::Replay(json!({ "id": "b-1" }))
    );
}

#[test]
fn store_file_is_readable_json_with_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotency.json");

    let store = open_store(&path);
    store.reserve(KEY, CMD, HASH).unwrap();
    drop(store);

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["version"], json!(1));
    let entries = raw["entries"].as_object().unwrap();
    assert_eq!(entries.len(), 1);
    let entry: StoreEntry = serde_json::from_value(entries.values().next().unwrap().clone()).unwrap();
    assert!(entry.is_pending());
    assert!(dir.path().join("idempotency.json.lock").exists());
}

#[test]
fn leftover_lock_file_does_not_lose_concurrent_reserves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotency.json");
    std::fs::write(
        dir.path().join("idempotency.json.lock"),
        br#"{"pid":999999,"acquired_ms":1}"#,
    )
    .unwrap();

    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = open_store(&path);
                barrier.wait();
                let key = format!("block.delete:14620000:{i:04x}");
                store.reserve(&key, "block.delete", HASH).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Reservation::Execute);
    }
    let entries = open_store(&path).entries().unwrap();
    assert_eq!(entries.len(), contenders, "every reserve survived");
}
