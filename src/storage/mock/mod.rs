//! Mock storage implementation for testing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{MessageFilter, MessageStore, Result, StorageError, StoredMessage};

#[derive(Default)]
struct State {
    messages: Vec<StoredMessage>,
    next_id: i64,
}

/// Mock message store that keeps messages in memory.
///
/// Each operation can be told to fail with a transient `Unavailable` error.
#[derive(Default)]
pub struct MockMessageStore {
    state: RwLock<State>,
    fail_on_insert: AtomicBool,
    fail_on_fetch: AtomicBool,
    fail_on_mark: AtomicBool,
    closed: AtomicBool,
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.fail_on_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_mark(&self, fail: bool) {
        self.fail_on_mark.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every stored message in insertion order.
    pub async fn all(&self) -> Vec<StoredMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn get(&self, id: i64) -> Option<StoredMessage> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "mock {} failure",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn insert(&self, topic: &str, payload: &str, timestamp: DateTime<Utc>) -> Result<i64> {
        self.check(&self.fail_on_insert, "insert")?;

        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.push(StoredMessage {
            id,
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp,
            processed: false,
        });
        Ok(id)
    }

    async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<StoredMessage>> {
        self.check(&self.fail_on_fetch, "fetch")?;

        let state = self.state.read().await;
        let mut pending: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| !m.processed)
            .cloned()
            .collect();
        pending.sort_by_key(|m| (m.timestamp, m.id));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn fetch(&self, filter: &MessageFilter) -> Result<Vec<StoredMessage>> {
        self.check(&self.fail_on_fetch, "fetch")?;

        let state = self.state.read().await;
        let mut matching: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| filter.admits(m))
            .cloned()
            .collect();
        matching.sort_by_key(|m| std::cmp::Reverse((m.timestamp, m.id)));
        matching.truncate(filter.limit as usize);
        Ok(matching)
    }

    async fn mark_processed(&self, id: i64) -> Result<bool> {
        self.check(&self.fail_on_mark, "mark")?;

        let mut state = self.state.write().await;
        match state.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if !message.processed => {
                message.processed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.fail_on_fetch.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
