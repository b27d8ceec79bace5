//! Broker connection configuration.

use std::time::Duration;

use serde::Deserialize;

use super::{invalid, ConfigError};

fn default_client_id() -> String {
    "thistle-server".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

/// MQTT broker configuration.
///
/// Everything except the client id and keep-alive has to be supplied.
#[derive(Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username; an empty string connects anonymously.
    pub username: String,
    /// Password paired with `username`.
    pub password: String,
    /// Topic (filter) this service ingests from.
    pub subscribe_topic: String,
    /// Topic processed payloads and submissions are published to.
    pub publish_topic: String,
    /// First reconnect delay, and the value the delay resets to after a successful connect.
    pub backoff_floor_ms: u64,
    /// Upper bound for the reconnect delay.
    pub backoff_ceiling_ms: u64,
    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// MQTT keep-alive interval.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl BrokerConfig {
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("broker.host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("broker.port must be non-zero"));
        }
        if self.subscribe_topic.trim().is_empty() {
            return Err(invalid("broker.subscribe_topic must not be empty"));
        }
        if self.publish_topic.trim().is_empty() {
            return Err(invalid("broker.publish_topic must not be empty"));
        }
        if self.publish_topic.contains(['+', '#']) {
            return Err(invalid(format!(
                "broker.publish_topic '{}' must not contain wildcards",
                self.publish_topic
            )));
        }
        if self.backoff_floor_ms == 0 {
            return Err(invalid("broker.backoff_floor_ms must be non-zero"));
        }
        if self.backoff_floor_ms > self.backoff_ceiling_ms {
            return Err(invalid(format!(
                "broker.backoff_floor_ms ({}) exceeds backoff_ceiling_ms ({})",
                self.backoff_floor_ms, self.backoff_ceiling_ms
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("subscribe_topic", &self.subscribe_topic)
            .field("publish_topic", &self.publish_topic)
            .field("backoff_floor_ms", &self.backoff_floor_ms)
            .field("backoff_ceiling_ms", &self.backoff_ceiling_ms)
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}
