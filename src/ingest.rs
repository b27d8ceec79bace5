//! Persistence of inbound broker messages.
//!
//! The ingestor is the single consumer of the FIFO fed by the broker client.
//! Messages are handled strictly one at a time so store ids follow arrival order.
//!
//! Arrival timestamps come from an [`ArrivalClock`] that the runtime shares with
//! packet submission, so every assigned timestamp is unique. Across those two
//! writers ids and timestamps may still disagree (a later timestamp can commit
//! first); readers order by `(timestamp, id)`, never by id alone.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::InboundMessage;
use crate::storage::MessageStore;
use crate::utils::retry::retry_store;
use crate::utils::shutdown;

/// Result of ingesting one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(i64),
    /// Undecodable or not persisted; broker redelivery is the only recovery.
    Dropped,
}

/// Source of arrival timestamps: wall clock, forced strictly increasing.
///
/// Timestamps are stored with microsecond precision, so a regression or
/// collision is bumped one microsecond past the previous assignment.
#[derive(Debug, Default)]
pub struct ArrivalClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ArrivalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> DateTime<Utc> {
        let now = truncate_to_micros(Utc::now());
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let timestamp = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(timestamp);
        timestamp
    }
}

/// Writes inbound messages to the store with an arrival timestamp.
pub struct Ingestor {
    store: Arc<dyn MessageStore>,
    clock: Arc<ArrivalClock>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_clock(store, Arc::new(ArrivalClock::new()))
    }

    pub fn with_clock(store: Arc<dyn MessageStore>, clock: Arc<ArrivalClock>) -> Self {
        Self { store, clock }
    }

    /// Consume the queue until it closes or `shutdown` fires.
    ///
    /// On shutdown, messages already buffered are still persisted.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Ingestor started");
        let mut stored = 0u64;
        let mut dropped = 0u64;

        loop {
            let message = tokio::select! {
                message = rx.recv() => message,
                _ = shutdown::cancelled(&mut shutdown) => {
                    rx.close();
                    rx.recv().await
                }
            };
            let Some(message) = message else { break };

            match self.ingest(&message.topic, &message.payload).await {
                IngestOutcome::Stored(_) => stored += 1,
                IngestOutcome::Dropped => dropped += 1,
            }

            if shutdown::is_cancelled(&shutdown) {
                rx.close();
            }
        }

        info!(stored, dropped, "Ingestor stopped");
    }

    /// Persist one message.
    ///
    /// Failures are logged and reported as [`IngestOutcome::Dropped`]; they
    /// never stop the consumer.
    pub async fn ingest(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(topic, error = %e, bytes = payload.len(), "Dropping non UTF-8 payload");
                return IngestOutcome::Dropped;
            }
        };

        let timestamp = self.clock.next();
        let store = &self.store;
        match retry_store("insert", || store.insert(topic, text, timestamp)).await {
            Ok(id) => {
                debug!(id, topic, "Message stored");
                IngestOutcome::Stored(id)
            }
            Err(e) => {
                error!(topic, error = %e, "Dropping message, insert failed");
                IngestOutcome::Dropped
            }
        }
    }
}

fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(timestamp.timestamp_micros()).unwrap_or(timestamp)
}
