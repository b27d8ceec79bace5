//! Shared storage helper functions.
//!
//! Timestamps are persisted as integer microseconds since the Unix epoch so
//! that ordering and range comparisons behave identically on every backend.

use chrono::{DateTime, Utc};

use super::{Result, StorageError};

/// Convert a timestamp to its stored representation.
pub fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

/// Convert a stored value back into a timestamp.
pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or(StorageError::InvalidTimestamp(micros))
}
