//! Submission and query operations behind the HTTP surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::broker::{BrokerError, Publisher};
use crate::ingest::ArrivalClock;
use crate::storage::{MessageCursor, MessageFilter, MessageStore, StorageError, StoredMessage};
use crate::utils::retry::retry_store;

/// Largest page a query may request.
pub const MAX_QUERY_LIMIT: u32 = 1000;
/// Page size when the query does not specify one.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;
/// Pages scanned while filling a key/value filtered query.
const MAX_FILTER_PAGES: usize = 10;

/// Errors returned to callers of the services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Command submitted for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub device_id: i64,
    pub command: i64,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub id: i64,
    /// Whether the immediate publish went out. The stored record is
    /// processed and republished later either way.
    pub published: bool,
}

/// Persists submitted packets and publishes them on the outbound topic.
pub struct SubmissionService {
    store: Arc<dyn MessageStore>,
    publisher: Arc<dyn Publisher>,
    publish_topic: String,
    clock: Arc<ArrivalClock>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn Publisher>,
        publish_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            publish_topic: publish_topic.into(),
            clock: Arc::new(ArrivalClock::new()),
        }
    }

    /// Take timestamps from `clock`, normally the one the ingestor uses.
    pub fn with_clock(mut self, clock: Arc<ArrivalClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store then publish a packet.
    ///
    /// Refused with [`BrokerError::NotConnected`] before anything is stored
    /// while the broker session is down.
    pub async fn submit(&self, packet: &Packet) -> Result<Submission, ServiceError> {
        if !self.publisher.is_connected() {
            return Err(BrokerError::NotConnected.into());
        }

        let payload = serde_json::to_string(packet)
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let topic = self.publish_topic.as_str();
        let store = &self.store;
        let timestamp = self.clock.next();
        let id = retry_store("insert", || store.insert(topic, &payload, timestamp)).await?;

        let published = match self.publisher.publish(topic, payload.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(id, topic, error = %e, "Submitted packet stored but not published");
                false
            }
        };

        info!(id, device_id = packet.device_id, command = packet.command, "Packet submitted");
        Ok(Submission { id, published })
    }
}

fn default_limit() -> u32 {
    DEFAULT_QUERY_LIMIT
}

/// Parameters of a stored-message query.
///
/// Times are seconds since the Unix epoch. `key` and `value` filter on a
/// top-level field of the JSON payload and only apply together.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUERY_LIMIT,
            start_time: None,
            end_time: None,
            key: None,
            value: None,
        }
    }
}

impl MessageQuery {
    fn filter(&self) -> Result<MessageFilter, ServiceError> {
        if !(1..=MAX_QUERY_LIMIT).contains(&self.limit) {
            return Err(ServiceError::InvalidRequest(format!(
                "limit must be between 1 and {}",
                MAX_QUERY_LIMIT
            )));
        }
        Ok(MessageFilter {
            start: self.start_time.map(|t| epoch_seconds("start_time", t)).transpose()?,
            end: self.end_time.map(|t| epoch_seconds("end_time", t)).transpose()?,
            before: None,
            limit: self.limit,
        })
    }

    fn field_filter(&self) -> Option<(&str, &str)> {
        match (&self.key, &self.value) {
            (Some(key), Some(value)) => Some((key.as_str(), value.as_str())),
            _ => None,
        }
    }
}

fn epoch_seconds(name: &str, seconds: f64) -> Result<DateTime<Utc>, ServiceError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ServiceError::InvalidRequest(format!(
            "{} must be a non-negative number of seconds",
            name
        )));
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0) as i64)
        .ok_or_else(|| ServiceError::InvalidRequest(format!("{} is out of range", name)))
}

/// A stored message as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub topic: String,
    /// Decoded JSON, or the raw text as a JSON string when it does not parse.
    pub payload: Value,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl From<StoredMessage> for MessageView {
    fn from(message: StoredMessage) -> Self {
        let payload = serde_json::from_str(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload.clone()));
        Self {
            id: message.id,
            topic: message.topic,
            payload,
            timestamp: message.timestamp.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Read-only access to stored messages.
pub struct QueryService {
    store: Arc<dyn MessageStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Messages matching `query`, newest first.
    pub async fn messages(&self, query: &MessageQuery) -> Result<Vec<MessageView>, ServiceError> {
        let mut filter = query.filter()?;
        let store = &self.store;

        let Some((key, value)) = query.field_filter() else {
            let page = retry_store("fetch", || store.fetch(&filter)).await?;
            return Ok(page.into_iter().map(MessageView::from).collect());
        };

        // Filter pages until the limit is filled, resuming after the last row seen.
        let limit = query.limit as usize;
        let mut views = Vec::new();
        for _ in 0..MAX_FILTER_PAGES {
            let page = retry_store("fetch", || store.fetch(&filter)).await?;
            let exhausted = page.len() < filter.limit as usize;
            let Some(last) = page.last().map(MessageCursor::from) else {
                break;
            };

            for message in page {
                let view = MessageView::from(message);
                if field_matches(&view.payload, key, value) {
                    views.push(view);
                    if views.len() == limit {
                        return Ok(views);
                    }
                }
            }

            if exhausted {
                break;
            }
            filter.before = Some(last);
        }
        Ok(views)
    }
}

/// Compare a payload field with a query value.
///
/// Strings compare by content, anything else by its JSON rendering.
fn field_matches(payload: &Value, key: &str, expected: &str) -> bool {
    match payload.get(key) {
        Some(Value::String(actual)) => actual == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}
