//! Message processing and live streaming configuration.

use std::time::Duration;

use serde::Deserialize;

use super::{invalid, ConfigError};
use crate::broadcast::OverflowPolicy;

fn default_batch_size() -> u32 {
    100
}

fn default_recovery_delay_ms() -> u64 {
    5000
}

fn default_republish() -> bool {
    true
}

/// Processor loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Sleep between poll cycles.
    pub poll_interval_ms: u64,
    /// Maximum unprocessed records fetched per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Sleep after the store could not be read.
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
    /// Republish processed payloads to the broker.
    #[serde(default = "default_republish")]
    pub republish: bool,
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(invalid("processing.poll_interval_ms must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("processing.batch_size must be non-zero"));
        }
        Ok(())
    }
}

/// Live subscriber configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Idle time after which a subscriber receives a ping.
    pub keepalive_ms: u64,
    /// Pending events held per subscriber before the overflow policy applies.
    pub queue_capacity: usize,
    /// What to do when a subscriber's queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: 1000,
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl StreamingConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_ms == 0 {
            return Err(invalid("streaming.keepalive_ms must be non-zero"));
        }
        if self.queue_capacity == 0 && self.overflow != OverflowPolicy::Unbounded {
            return Err(invalid(
                "streaming.queue_capacity must be non-zero for bounded overflow policies",
            ));
        }
        Ok(())
    }
}
