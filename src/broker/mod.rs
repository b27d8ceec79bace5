//! Broker connection and inbound delivery.
//!
//! This module contains:
//! - `BrokerClient`: connection state machine with reconnect backoff
//! - `Transport` / `BrokerLink`: the I/O seam, split into the event-driving half
//!   (owned by the client task) and the request half (shared)
//! - `Publisher`: the outbound publish contract used by the processor and services
//! - Implementations: MQTT (rumqttc) and a scripted mock

use async_trait::async_trait;
use bytes::Bytes;

mod client;
pub mod mock;
#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use client::{BrokerClient, DISCONNECT_FLUSH_TIMEOUT};
pub use mock::{MockLink, MockPublisher, MockTransport, MockTransportHandle};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttLink, MqttTransport};

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription rejected: {0}")]
    Subscription(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Lifecycle of the single broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// What one turn of the transport produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected,
    /// Publication on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The session was closed, by the broker or by our own DISCONNECT.
    Disconnected,
    /// Protocol traffic with no meaning to the client (acks, pings).
    Other,
}

/// Event-driving half of a broker connection.
///
/// `poll` performs the network I/O: it connects when needed and returns the
/// next event. An `Err` means the handshake failed or the session dropped;
/// polling again attempts a fresh connection.
#[async_trait]
pub trait Transport: Send {
    async fn poll(&mut self) -> Result<TransportEvent>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn poll(&mut self) -> Result<TransportEvent> {
        (**self).poll().await
    }
}

/// Request half of a broker connection.
///
/// Every request only enqueues; none waits on the network, so they are safe to
/// call from the task that drives `Transport::poll`. Queued requests reach the
/// broker only while the transport is being polled.
pub trait BrokerLink: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<()>;

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Queue a graceful DISCONNECT. The transport reports it as
    /// [`TransportEvent::Disconnected`] once written.
    fn disconnect(&self) -> Result<()>;
}

/// Outbound publication.
///
/// Best effort: fails immediately with [`BrokerError::NotConnected`] instead of
/// queueing while the session is down.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool;
}
