//! Background processing of stored messages.
//!
//! Each cycle drains unprocessed records oldest first: decode, dispatch to live
//! subscribers, optionally republish, then mark processed. The store stays the
//! single source of truth, so a restart resumes from whatever is still unmarked.

mod policy;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::broker::Publisher;
use crate::config::{BrokerConfig, ProcessingConfig};
use crate::storage::{MessageStore, StorageError, StoredMessage};
use crate::utils::retry::retry_store;
use crate::utils::shutdown;

pub use policy::{AlwaysPublish, DispatchPolicy, Identity, NeverPublish, PayloadTransform};

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Topic processed payloads are republished to.
    pub publish_topic: String,
    pub batch_size: u32,
    pub poll_interval: Duration,
    pub recovery_delay: Duration,
}

impl ProcessorConfig {
    pub fn new(broker: &BrokerConfig, processing: &ProcessingConfig) -> Self {
        Self {
            publish_topic: broker.publish_topic.clone(),
            batch_size: processing.batch_size,
            poll_interval: processing.poll_interval(),
            recovery_delay: processing.recovery_delay(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Decoded and handed to the broadcaster.
    pub dispatched: usize,
    /// Undecodable payloads, marked without dispatch.
    pub malformed: usize,
    pub published: usize,
    pub publish_failures: usize,
    /// Records this cycle moved to processed.
    pub newly_marked: usize,
}

/// Drains unprocessed records and drives delivery.
pub struct MessageProcessor {
    store: Arc<dyn MessageStore>,
    broadcaster: Broadcaster,
    publisher: Arc<dyn Publisher>,
    policy: Arc<dyn DispatchPolicy>,
    transform: Arc<dyn PayloadTransform>,
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        broadcaster: Broadcaster,
        publisher: Arc<dyn Publisher>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            publisher,
            policy: Arc::new(AlwaysPublish),
            transform: Arc::new(Identity),
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DispatchPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn PayloadTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Loop until `shutdown` fires.
    ///
    /// The poll sleep is skipped after a batch that was full and fully marked.
    /// A cycle interrupted by shutdown leaves its remaining records unmarked;
    /// they are dispatched again on the next start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Message processor started"
        );

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown::cancelled(&mut shutdown) => break,
                outcome = self.run_cycle() => outcome,
            };

            let pause = match outcome {
                Ok(report) if report.newly_marked >= self.config.batch_size as usize => {
                    debug!(?report, "Full batch processed, continuing");
                    continue;
                }
                Ok(report) => {
                    if report.fetched > 0 {
                        debug!(?report, "Batch processed");
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    error!(
                        error = %e,
                        delay_ms = self.config.recovery_delay.as_millis() as u64,
                        "Failed to fetch unprocessed messages"
                    );
                    self.config.recovery_delay
                }
            };

            if shutdown::sleep_or_cancelled(pause, &mut shutdown).await {
                break;
            }
        }

        info!("Message processor stopped");
    }

    /// Process one batch.
    ///
    /// Fails only when the batch could not be fetched, in which case nothing
    /// was marked.
    pub async fn run_cycle(&self) -> Result<CycleReport, StorageError> {
        let limit = self.config.batch_size;
        let store = &self.store;
        let batch = retry_store("fetch_unprocessed", || store.fetch_unprocessed(limit)).await?;

        let mut report = CycleReport {
            fetched: batch.len(),
            ..CycleReport::default()
        };
        for message in &batch {
            self.process(message, &mut report).await;
        }
        Ok(report)
    }

    async fn process(&self, message: &StoredMessage, report: &mut CycleReport) {
        match serde_json::from_str::<Value>(&message.payload) {
            Ok(decoded) => {
                let payload = self.transform.transform(message, decoded);
                self.broadcaster.send_event(payload.clone());
                report.dispatched += 1;

                if self.policy.should_publish(&payload) {
                    self.republish(message.id, &payload, report);
                }
            }
            Err(e) => {
                warn!(
                    id = message.id,
                    topic = %message.topic,
                    error = %e,
                    "Malformed payload, marking processed without dispatch"
                );
                report.malformed += 1;
            }
        }

        self.mark(message.id, report).await;
    }

    fn republish(&self, id: i64, payload: &Value, report: &mut CycleReport) {
        let bytes = payload.to_string();
        match self.publisher.publish(&self.config.publish_topic, bytes.as_bytes()) {
            Ok(()) => report.published += 1,
            Err(e) => {
                warn!(id, topic = %self.config.publish_topic, error = %e, "Republish failed");
                report.publish_failures += 1;
            }
        }
    }

    async fn mark(&self, id: i64, report: &mut CycleReport) {
        let store = &self.store;
        match retry_store("mark_processed", || store.mark_processed(id)).await {
            Ok(true) => report.newly_marked += 1,
            Ok(false) => debug!(id, "Message already processed"),
            Err(e) => error!(id, error = %e, "Failed to mark message processed, will retry"),
        }
    }
}
