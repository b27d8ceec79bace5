//! Pluggable decisions made per processed record.

use serde_json::Value;

use crate::storage::StoredMessage;

/// Decides whether a processed payload is republished to the broker.
pub trait DispatchPolicy: Send + Sync {
    fn should_publish(&self, payload: &Value) -> bool;
}

/// Republish every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPublish;

impl DispatchPolicy for AlwaysPublish {
    fn should_publish(&self, _payload: &Value) -> bool {
        true
    }
}

/// Never republish; subscribers still receive every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPublish;

impl DispatchPolicy for NeverPublish {
    fn should_publish(&self, _payload: &Value) -> bool {
        false
    }
}

impl<F> DispatchPolicy for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn should_publish(&self, payload: &Value) -> bool {
        self(payload)
    }
}

/// Rewrites a decoded payload before it is dispatched.
pub trait PayloadTransform: Send + Sync {
    fn transform(&self, message: &StoredMessage, payload: Value) -> Value;
}

/// Pass payloads through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PayloadTransform for Identity {
    fn transform(&self, _message: &StoredMessage, payload: Value) -> Value {
        payload
    }
}
