//! MessageStore interface tests.
//!
//! These tests verify the contract of the MessageStore trait.
//! Each storage implementation should run these tests. Tests share one store,
//! so each uses its own topic and its own time window.

use chrono::{DateTime, TimeZone, Utc};

use thistle::storage::{MessageCursor, MessageFilter, MessageStore, StoredMessage};

/// A timestamp inside the window reserved for `window`.
pub fn at(window: i64, offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_000_000_000 + window * 100_000 + offset_secs, 0)
        .unwrap()
}

async fn unprocessed_on<S: MessageStore>(store: &S, topic: &str) -> Vec<StoredMessage> {
    store
        .fetch_unprocessed(10_000)
        .await
        .expect("fetch_unprocessed should succeed")
        .into_iter()
        .filter(|m| m.topic == topic)
        .collect()
}

fn window(window: i64, limit: u32) -> MessageFilter {
    MessageFilter {
        start: Some(at(window, 0)),
        end: Some(at(window, 99_999)),
        before: None,
        limit,
    }
}

// =============================================================================
// MessageStore::insert tests
// =============================================================================

pub async fn test_insert_returns_increasing_ids<S: MessageStore>(store: &S) {
    let topic = "test_insert_ids";
    let mut previous = 0;
    for i in 0..5 {
        let id = store
            .insert(topic, "{}", at(1, i))
            .await
            .expect("insert should succeed");
        assert!(id > previous, "ids should increase: {} after {}", id, previous);
        previous = id;
    }
}

pub async fn test_insert_preserves_fields<S: MessageStore>(store: &S) {
    let topic = "test_insert_fields";
    let payload = r#"{"device":"sensor-1","reading":21.5,"note":"ünïcode"}"#;
    let timestamp = at(2, 0) + chrono::Duration::microseconds(123_456);

    let id = store
        .insert(topic, payload, timestamp)
        .await
        .expect("insert should succeed");

    let stored = unprocessed_on(store, topic).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].payload, payload);
    assert_eq!(stored[0].timestamp, timestamp, "microsecond precision should survive");
    assert!(!stored[0].processed, "new messages start unprocessed");
}

// =============================================================================
// MessageStore::fetch_unprocessed tests
// =============================================================================

pub async fn test_fetch_unprocessed_orders_by_timestamp<S: MessageStore>(store: &S) {
    let topic = "test_unprocessed_order";
    let late = store.insert(topic, "1", at(3, 100)).await.unwrap();
    let early = store.insert(topic, "2", at(3, 90)).await.unwrap();

    let ids: Vec<i64> = unprocessed_on(store, topic).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![early, late], "timestamp order, not insertion order");
}

pub async fn test_fetch_unprocessed_breaks_ties_by_id<S: MessageStore>(store: &S) {
    let topic = "test_unprocessed_ties";
    let first = store.insert(topic, "1", at(4, 5)).await.unwrap();
    let second = store.insert(topic, "2", at(4, 5)).await.unwrap();

    let ids: Vec<i64> = unprocessed_on(store, topic).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first, second]);
}

pub async fn test_fetch_unprocessed_respects_limit<S: MessageStore>(store: &S) {
    let topic = "test_unprocessed_limit";
    for i in 0..3 {
        store.insert(topic, "{}", at(5, i)).await.unwrap();
    }

    let batch = store.fetch_unprocessed(2).await.unwrap();
    assert_eq!(batch.len(), 2);
}

// =============================================================================
// MessageStore::mark_processed tests
// =============================================================================

pub async fn test_mark_processed_removes_from_unprocessed<S: MessageStore>(store: &S) {
    let topic = "test_mark";
    let keep = store.insert(topic, "1", at(6, 1)).await.unwrap();
    let done = store.insert(topic, "2", at(6, 2)).await.unwrap();

    assert!(store.mark_processed(done).await.unwrap());

    let ids: Vec<i64> = unprocessed_on(store, topic).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![keep]);
}

pub async fn test_mark_processed_is_idempotent<S: MessageStore>(store: &S) {
    let topic = "test_mark_twice";
    let id = store.insert(topic, "{}", at(7, 0)).await.unwrap();

    assert!(store.mark_processed(id).await.unwrap(), "first mark performs the transition");
    assert!(!store.mark_processed(id).await.unwrap(), "second mark is a no-op");

    let stored = store.fetch(&window(7, 10)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].processed);
}

pub async fn test_mark_unknown_id<S: MessageStore>(store: &S) {
    let result = store.mark_processed(i64::MAX).await;
    assert!(!result.expect("unknown ids are not an error"));
}

// =============================================================================
// MessageStore::fetch tests
// =============================================================================

pub async fn test_fetch_newest_first<S: MessageStore>(store: &S) {
    let topic = "test_fetch_order";
    for (offset, payload) in [(10, "a"), (30, "c"), (20, "b")] {
        store.insert(topic, payload, at(8, offset)).await.unwrap();
    }

    let payloads: Vec<String> = store
        .fetch(&window(8, 10))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec!["c", "b", "a"]);
}

pub async fn test_fetch_bounds_are_inclusive<S: MessageStore>(store: &S) {
    let topic = "test_fetch_bounds";
    for offset in [9, 10, 20, 21] {
        store.insert(topic, "{}", at(9, offset)).await.unwrap();
    }

    let filter = MessageFilter {
        start: Some(at(9, 10)),
        end: Some(at(9, 20)),
        before: None,
        limit: 10,
    };
    let stamps: Vec<DateTime<Utc>> = store
        .fetch(&filter)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.timestamp)
        .collect();
    assert_eq!(stamps, vec![at(9, 20), at(9, 10)]);
}

pub async fn test_fetch_respects_limit<S: MessageStore>(store: &S) {
    let topic = "test_fetch_limit";
    for i in 0..5 {
        store.insert(topic, "{}", at(10, i)).await.unwrap();
    }

    let newest = store.fetch(&window(10, 2)).await.unwrap();
    assert_eq!(newest.len(), 2);
    assert_eq!(newest[0].timestamp, at(10, 4));
}

pub async fn test_fetch_includes_processed<S: MessageStore>(store: &S) {
    let topic = "test_fetch_processed";
    let id = store.insert(topic, "{}", at(11, 0)).await.unwrap();
    store.mark_processed(id).await.unwrap();

    let found = store.fetch(&window(11, 10)).await.unwrap();
    assert_eq!(found.len(), 1);
}

pub async fn test_fetch_pages_through_timestamp_ties<S: MessageStore>(store: &S) {
    let topic = "test_fetch_cursor";
    let older = store.insert(topic, "older", at(12, 1)).await.unwrap();
    let mut tied = Vec::new();
    for _ in 0..3 {
        tied.push(store.insert(topic, "tied", at(12, 5)).await.unwrap());
    }

    let mut filter = window(12, 2);
    let mut ids = Vec::new();
    loop {
        let page = store.fetch(&filter).await.unwrap();
        let Some(last) = page.last().map(MessageCursor::from) else {
            break;
        };
        ids.extend(page.iter().map(|m| m.id));
        filter.before = Some(last);
    }

    assert_eq!(ids, vec![tied[2], tied[1], tied[0], older]);
}

// =============================================================================
// MessageStore::health_check tests
// =============================================================================

pub async fn test_health_check<S: MessageStore>(store: &S) {
    assert!(store.health_check().await, "open store should be healthy");
}

/// Run all MessageStore tests against a store implementation.
#[macro_export]
macro_rules! run_message_store_tests {
    ($store:expr) => {
        use $crate::storage::message_store_tests::*;

        // insert tests
        test_insert_returns_increasing_ids($store).await;
        println!("  test_insert_returns_increasing_ids: PASSED");

        test_insert_preserves_fields($store).await;
        println!("  test_insert_preserves_fields: PASSED");

        // fetch_unprocessed tests
        test_fetch_unprocessed_orders_by_timestamp($store).await;
        println!("  test_fetch_unprocessed_orders_by_timestamp: PASSED");

        test_fetch_unprocessed_breaks_ties_by_id($store).await;
        println!("  test_fetch_unprocessed_breaks_ties_by_id: PASSED");

        test_fetch_unprocessed_respects_limit($store).await;
        println!("  test_fetch_unprocessed_respects_limit: PASSED");

        // mark_processed tests
        test_mark_processed_removes_from_unprocessed($store).await;
        println!("  test_mark_processed_removes_from_unprocessed: PASSED");

        test_mark_processed_is_idempotent($store).await;
        println!("  test_mark_processed_is_idempotent: PASSED");

        test_mark_unknown_id($store).await;
        println!("  test_mark_unknown_id: PASSED");

        // fetch tests
        test_fetch_newest_first($store).await;
        println!("  test_fetch_newest_first: PASSED");

        test_fetch_bounds_are_inclusive($store).await;
        println!("  test_fetch_bounds_are_inclusive: PASSED");

        test_fetch_respects_limit($store).await;
        println!("  test_fetch_respects_limit: PASSED");

        test_fetch_includes_processed($store).await;
        println!("  test_fetch_includes_processed: PASSED");

        test_fetch_pages_through_timestamp_ties($store).await;
        println!("  test_fetch_pages_through_timestamp_ties: PASSED");

        // health tests
        test_health_check($store).await;
        println!("  test_health_check: PASSED");
    };
}
