//! In-memory mock storage contract tests.
//!
//! Run with: cargo test --test storage_mock

mod storage;

use thistle::storage::MockMessageStore;

#[tokio::test]
async fn test_mock_message_store() {
    println!("=== Mock MessageStore Tests ===");

    let store = MockMessageStore::new();
    run_message_store_tests!(&store);

    println!("=== All Mock MessageStore tests PASSED ===");
}
