//! PaginatedQueue tests: FIFO across tiers, dedup, durability, point lookup.

use rusqlite::Connection;
use tempfile::TempDir;

use super::{test_config, uid};
use crate::queue::paginated::PaginatedQueue;
use crate::queue::sqlite::QueueStore;

fn create_test_queue(page_size: usize) -> (PaginatedQueue<String>, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let queue = PaginatedQueue::open(&dir.path().join("paginated-test"), &test_config(page_size, 3))
        .expect("open queue");
    (queue, dir)
}

fn push_n(queue: &mut PaginatedQueue<String>, from: u32, to: u32) {
    for i in from..=to {
        queue.push(uid(i), format!("p{i}")).expect("push");
    }
}

#[test]
fn test_fifo_under_paging() {
    // 3N+1 items for page_size N crosses every buffer/store boundary.
    let (mut queue, _dir) = create_test_queue(4);
    push_n(&mut queue, 1, 13);
    assert_eq!(queue.size().expect("size"), 13);

    for i in 1..=13 {
        let (id, payload) = queue.pop().expect("pop").expect("entry");
        assert_eq!(id, uid(i));
        assert_eq!(payload, format!("p{i}"));
    }
    assert!(queue.pop().expect("pop").is_none());
}

#[test]
fn test_concrete_35_item_scenario() {
    let (mut queue, _dir) = create_test_queue(10);
    push_n(&mut queue, 1, 35);
    assert_eq!(queue.size().expect("size"), 35);

    let popped: Vec<_> = (0..35)
        .map(|_| queue.pop().expect("pop").expect("entry").0)
        .collect();
    let expected: Vec<_> = (1..=35).map(uid).collect();
    assert_eq!(popped, expected);
}

#[test]
fn test_dedup_in_every_tier() {
    // page_size 2: after 5 pushes the tiers hold front {1,2}, store {3,4},
    // back {5}.
    let (mut queue, _dir) = create_test_queue(2);
    push_n(&mut queue, 1, 5);
    assert_eq!(queue.size().expect("size"), 5);

    for i in [1u32, 3, 5] {
        let id = queue.push(uid(i), "dup".to_string()).expect("push");
        assert_eq!(id, uid(i));
    }
    assert_eq!(queue.size().expect("size"), 5);

    // The resident payloads are untouched.
    assert_eq!(
        queue.inspect_by_id(&uid(3)).expect("inspect"),
        Some("p3".to_string())
    );
}

#[test]
fn test_point_lookup_front_tier() {
    let (mut queue, _dir) = create_test_queue(100);
    push_n(&mut queue, 1, 1);
    assert_eq!(
        queue.inspect_by_id(&uid(1)).expect("inspect"),
        Some("p1".to_string())
    );
    assert_eq!(queue.pop_by_id(&uid(1)).expect("pop"), Some("p1".to_string()));
    assert_eq!(queue.size().expect("size"), 0);
}

#[test]
fn test_point_lookup_back_tier() {
    let (mut queue, _dir) = create_test_queue(100);
    push_n(&mut queue, 1, 251);
    assert_eq!(
        queue.inspect_by_id(&uid(251)).expect("inspect"),
        Some("p251".to_string())
    );
    assert_eq!(
        queue.pop_by_id(&uid(251)).expect("pop"),
        Some("p251".to_string())
    );
    assert_eq!(queue.size().expect("size"), 250);
}

#[test]
fn test_point_lookup_store_tier() {
    let (mut queue, _dir) = create_test_queue(100);
    push_n(&mut queue, 1, 300);
    // Items 101..=200 were spilled to the store.
    assert_eq!(
        queue.inspect_by_id(&uid(150)).expect("inspect"),
        Some("p150".to_string())
    );
    assert_eq!(queue.size().expect("size"), 300);
    assert_eq!(
        queue.pop_by_id(&uid(150)).expect("pop"),
        Some("p150".to_string())
    );
    assert_eq!(queue.size().expect("size"), 299);
    assert_eq!(queue.pop_by_id(&uid(150)).expect("pop"), None);
}

#[test]
fn test_durability_across_restart() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("paginated-durability");
    let config = test_config(10, 3);

    {
        let mut queue = PaginatedQueue::open(&path, &config).expect("open");
        for i in 1..=35 {
            queue.push(uid(i), format!("p{i}")).expect("push");
        }
        queue.shut_down().expect("shut down");
    }

    let mut queue: PaginatedQueue<String> = PaginatedQueue::open(&path, &config).expect("reopen");
    assert_eq!(queue.size().expect("size"), 35);
    for i in 1..=35 {
        assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
    }
}

#[test]
fn test_durability_after_partial_drain() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("paginated-partial");
    let config = test_config(5, 3);

    {
        let mut queue = PaginatedQueue::open(&path, &config).expect("open");
        for i in 1..=17 {
            queue.push(uid(i), format!("p{i}")).expect("push");
        }
        for i in 1..=6 {
            assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
        }
        queue.shut_down().expect("shut down");
    }

    let mut queue: PaginatedQueue<String> = PaginatedQueue::open(&path, &config).expect("reopen");
    assert_eq!(queue.size().expect("size"), 11);
    for i in 7..=17 {
        assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
    }
}

#[test]
fn test_empty_pop_realigns_and_queue_stays_usable() {
    let (mut queue, _dir) = create_test_queue(2);
    push_n(&mut queue, 1, 5);
    for _ in 0..5 {
        queue.pop().expect("pop").expect("entry");
    }
    assert!(queue.pop().expect("pop").is_none());

    push_n(&mut queue, 6, 10);
    assert_eq!(queue.size().expect("size"), 5);
    for i in 6..=10 {
        assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
    }
}

#[test]
fn test_clear() {
    let (mut queue, _dir) = create_test_queue(2);
    push_n(&mut queue, 1, 7);
    queue.clear().expect("clear");
    assert_eq!(queue.size().expect("size"), 0);
    assert!(queue.pop().expect("pop").is_none());
    assert_eq!(queue.inspect_by_id(&uid(3)).expect("inspect"), None);

    // A cleared queue accepts previously seen ids again.
    queue.push(uid(3), "again".to_string()).expect("push");
    assert_eq!(queue.size().expect("size"), 1);
}

#[test]
fn test_first_n_ids_front_buffer_only() {
    let (mut queue, _dir) = create_test_queue(2);
    push_n(&mut queue, 1, 6);
    // Front page holds u1, u2; store and back page are not consulted.
    assert_eq!(queue.first_n_ids(10), vec![uid(1), uid(2)]);
    assert_eq!(queue.first_n_ids(1), vec![uid(1)]);
}

#[test]
fn test_failed_spill_keeps_back_page_resident() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("paginated-spill");
    let mut queue: PaginatedQueue<String> =
        PaginatedQueue::open(&path, &test_config(2, 3)).expect("open");
    // page_size 2: front {1,2}, back {3,4}; the next push spills the back.
    push_n(&mut queue, 1, 4);

    let blocker = Connection::open(&path).expect("second connection");
    blocker.execute_batch("BEGIN IMMEDIATE").expect("lock");
    assert!(queue.push(uid(5), "p5".to_string()).is_err());
    blocker.execute_batch("COMMIT").expect("unlock");

    // The failed spill left every acknowledged entry in place.
    assert_eq!(queue.size().expect("size"), 4);
    queue.push(uid(5), "p5".to_string()).expect("push after unlock");
    for i in 1..=5 {
        assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
    }
}

#[test]
fn test_failed_shutdown_flush_is_retryable() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("paginated-flush");
    let config = test_config(2, 3);

    {
        let mut queue: PaginatedQueue<String> =
            PaginatedQueue::open(&path, &config).expect("open");
        push_n(&mut queue, 1, 3);

        let blocker = Connection::open(&path).expect("second connection");
        blocker.execute_batch("BEGIN IMMEDIATE").expect("lock");
        assert!(queue.shut_down().is_err());
        blocker.execute_batch("COMMIT").expect("unlock");

        queue.shut_down().expect("retry");
    }

    let mut queue: PaginatedQueue<String> =
        PaginatedQueue::open(&path, &config).expect("reopen");
    assert_eq!(queue.size().expect("size"), 3);
    for i in 1..=3 {
        assert_eq!(queue.pop().expect("pop").expect("entry").0, uid(i));
    }
}

#[test]
fn test_decode_failure_restores_store_rows() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("paginated-corrupt");
    let config = test_config(2, 3);
    {
        let mut store = QueueStore::open(&path, &config).expect("open store");
        store
            .append(&[(uid(1), "not-json".to_string())])
            .expect("append");
        store.close().expect("close");
    }

    assert!(PaginatedQueue::<String>::open(&path, &config).is_err());

    // The undecodable row is still on disk for repair, not deleted.
    let store = QueueStore::open(&path, &config).expect("reopen store");
    assert_eq!(store.count().expect("count"), 1);
}

#[test]
fn test_size_counts_all_tiers() {
    let (mut queue, _dir) = create_test_queue(2);
    push_n(&mut queue, 1, 2);
    assert_eq!(queue.size().expect("size"), 2); // front only
    push_n(&mut queue, 3, 3);
    assert_eq!(queue.size().expect("size"), 3); // front + back
    push_n(&mut queue, 4, 7);
    assert_eq!(queue.size().expect("size"), 7); // front + store + back
}
