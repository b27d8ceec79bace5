//! Durable message storage.
//!
//! This module contains:
//! - `MessageStore` trait: the only storage contract the pipeline depends on
//! - `StoredMessage` / `MessageFilter`: records and query parameters
//! - `StorageError`: storage failures and their retry classification
//! - Implementations: SQL (SQLite, PostgreSQL) and an in-memory mock

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::{StorageConfig, StorageType};

pub mod helpers;
pub mod mock;
pub mod schema;
pub mod sql;

pub use mock::MockMessageStore;
#[cfg(feature = "postgres")]
pub use sql::postgres::PostgresMessageStore;
#[cfg(feature = "sqlite")]
pub use sql::sqlite::SqliteMessageStore;
pub use sql::{SqlDatabase, SqlMessageStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store is closed")]
    Closed,

    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Invalid stored timestamp: {0}us")]
    InvalidTimestamp(i64),

    #[error("Storage type '{0}' is not enabled in this build")]
    Unsupported(StorageType),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::WorkerCrashed
            ),
            StorageError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// A persisted inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    /// Assigned by the store, increasing with insertion order.
    pub id: i64,
    pub topic: String,
    /// Raw payload text, JSON by convention.
    pub payload: String,
    /// Arrival time assigned at ingestion.
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
}

/// Position in the newest-first `(timestamp, id)` order.
///
/// Pages resume strictly after a cursor, so rows sharing a timestamp are never
/// returned twice or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub timestamp: DateTime<Utc>,
    pub id: i64,
}

impl MessageCursor {
    /// Whether a row at `(timestamp, id)` comes after this cursor, i.e. is older.
    pub fn precedes(&self, timestamp: DateTime<Utc>, id: i64) -> bool {
        (timestamp, id) < (self.timestamp, self.id)
    }
}

impl From<&StoredMessage> for MessageCursor {
    fn from(message: &StoredMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            id: message.id,
        }
    }
}

/// Time-range query over stored messages.
///
/// Bounds are inclusive. Results are newest first. `before` continues a
/// previous page.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub before: Option<MessageCursor>,
    pub limit: u32,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            before: None,
            limit: 100,
        }
    }
}

impl MessageFilter {
    /// Whether `timestamp` falls inside the range.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }

    /// Whether `message` belongs to this page: inside the range and past the cursor.
    pub fn admits(&self, message: &StoredMessage) -> bool {
        self.contains(message.timestamp)
            && self
                .before
                .map_or(true, |cursor| cursor.precedes(message.timestamp, message.id))
    }
}

/// Interface for durable message persistence.
///
/// Implementations:
/// - `SqliteMessageStore`: SQLite storage
/// - `PostgresMessageStore`: PostgreSQL storage
/// - `MockMessageStore`: In-memory mock for testing
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new, unprocessed message. Returns its id.
    async fn insert(&self, topic: &str, payload: &str, timestamp: DateTime<Utc>) -> Result<i64>;

    /// Unprocessed messages, oldest first (timestamp, then id), at most `limit`.
    async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<StoredMessage>>;

    /// Messages inside the filter's time range, newest first.
    async fn fetch(&self, filter: &MessageFilter) -> Result<Vec<StoredMessage>>;

    /// Flag a message as processed.
    ///
    /// Idempotent. Returns `true` only for the call that performed the transition;
    /// unknown or already-processed ids return `false`.
    async fn mark_processed(&self, id: i64) -> Result<bool>;

    /// Whether the store currently answers queries.
    async fn health_check(&self) -> bool;

    /// Release connections. Later operations fail.
    async fn close(&self);
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    info!(storage_type = %config.storage_type, "Initializing storage");

    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = SqliteMessageStore::connect(&config.sqlite).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            let store = PostgresMessageStore::connect(&config.postgres).await?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => Err(StorageError::Unsupported(other)),
    }
}
