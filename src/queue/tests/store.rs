//! QueueStore (SQLite tier) tests.

use tempfile::TempDir;

use super::{test_config, uid};
use crate::error::QueueError;
use crate::queue::sqlite::QueueStore;

fn create_test_store() -> (QueueStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = QueueStore::open(&dir.path().join("store-test"), &test_config(10, 3))
        .expect("open store");
    (store, dir)
}

fn rows(ids: &[u32]) -> Vec<(uuid::Uuid, String)> {
    ids.iter().map(|&i| (uid(i), format!("p{i}"))).collect()
}

#[test]
fn test_append_and_load_oldest() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[1, 2, 3])).expect("append");
    assert_eq!(store.count().expect("count"), 3);

    let loaded = store.load_oldest(10).expect("load");
    let ids: Vec<_> = loaded.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![uid(1), uid(2), uid(3)]);
    assert_eq!(loaded[0].1, "p1");
    // Loading removes the rows.
    assert!(store.is_empty().expect("empty"));
}

#[test]
fn test_prepend_sorts_before_existing_rows() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[3])).expect("append");
    store.prepend(&rows(&[1, 2])).expect("prepend");

    let ids: Vec<_> = store
        .load_oldest(10)
        .expect("load")
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![uid(1), uid(2), uid(3)]);
}

#[test]
fn test_append_after_prepend_keeps_global_order() {
    let (store, _dir) = create_test_store();
    store.prepend(&rows(&[1, 2])).expect("prepend");
    store.append(&rows(&[3, 4])).expect("append");

    let ids: Vec<_> = store
        .load_oldest(10)
        .expect("load")
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![uid(1), uid(2), uid(3), uid(4)]);
}

#[test]
fn test_load_newest_returns_tail_in_fifo_order() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[1, 2, 3, 4])).expect("append");

    let newest = store.load_newest(2).expect("load");
    let ids: Vec<_> = newest.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![uid(3), uid(4)]);
    assert_eq!(store.count().expect("count"), 2);
}

#[test]
fn test_load_partial_page() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[1, 2, 3])).expect("append");
    assert_eq!(store.load_oldest(2).expect("load").len(), 2);
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn test_point_lookup_and_delete() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[1, 2])).expect("append");

    assert!(store.contains(&uid(1)).expect("contains"));
    assert_eq!(store.get(&uid(2)).expect("get"), Some("p2".to_string()));
    assert_eq!(store.get(&uid(9)).expect("get"), None);
    // get never mutates.
    assert_eq!(store.count().expect("count"), 2);

    assert_eq!(store.delete(&uid(1)).expect("delete"), Some("p1".to_string()));
    assert_eq!(store.delete(&uid(1)).expect("delete"), None);
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn test_unique_id_rejects_duplicates() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[1])).expect("append");
    assert!(store.append(&rows(&[1])).is_err());
}

#[test]
fn test_clear_removes_negative_and_positive_sequences() {
    let (store, _dir) = create_test_store();
    store.append(&rows(&[3, 4])).expect("append");
    store.prepend(&rows(&[1, 2])).expect("prepend");
    store.clear().expect("clear");
    assert!(store.is_empty().expect("empty"));
}

#[test]
fn test_close_then_use_fails() {
    let (mut store, _dir) = create_test_store();
    store.close().expect("close");
    assert!(matches!(store.count(), Err(QueueError::Closed)));
    // close is safe to call again
    store.close().expect("second close");
}

#[test]
fn test_reopen_preserves_rows() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("store-reopen");
    let config = test_config(10, 3);
    {
        let mut store = QueueStore::open(&path, &config).expect("open");
        store.append(&rows(&[1, 2])).expect("append");
        store.close().expect("close");
    }
    let store = QueueStore::open(&path, &config).expect("reopen");
    assert_eq!(store.count().expect("count"), 2);
}
