//! Retry utilities: reconnect backoff and bounded store retries.
//!
//! Store operations use `backon` for exponential backoff with jitter and a
//! hard attempt limit. Broker reconnects use [`Backoff`], a deterministic
//! doubling interval that is reset by a successful connect.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::storage::StorageError;

/// Retries attempted after the first failure of a store operation.
pub const STORE_RETRY_TIMES: usize = 3;

/// Backoff for transient store failures.
///
/// - Min delay: 50ms
/// - Max delay: 1s
/// - Max retries: 3
/// - Jitter enabled
pub fn store_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(STORE_RETRY_TIMES)
        .with_jitter()
}

/// Run a store operation, retrying transient failures with [`store_backoff`].
///
/// Non-transient errors are returned unchanged on first occurrence. When every
/// attempt fails transiently the last error is wrapped in
/// [`StorageError::Exhausted`].
pub async fn retry_store<T, F, Fut>(operation: &'static str, op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut retries = 0usize;

    let result = op
        .retry(store_backoff())
        .sleep(tokio::time::sleep)
        .when(StorageError::is_transient)
        .notify(|err: &StorageError, delay: Duration| {
            retries += 1;
            warn!(
                operation,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient store failure, retrying"
            );
        })
        .await;

    result.map_err(|e| {
        if e.is_transient() {
            StorageError::Exhausted {
                operation,
                attempts: retries + 1,
                source: Box::new(e),
            }
        } else {
            e
        }
    })
}

/// Reconnect interval generator.
///
/// Starts at `floor`, doubles on every [`Backoff::next_delay`] call and never
/// exceeds `ceiling`. [`Backoff::reset`] returns to `floor`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Interval the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the interval to wait now and double the stored one, capped at the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}
