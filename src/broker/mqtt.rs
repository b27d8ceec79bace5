//! MQTT transport backed by rumqttc.
//!
//! rumqttc splits a connection into an `EventLoop` that must be polled to make
//! progress and an `AsyncClient` that queues requests for it. The event loop
//! becomes the [`Transport`]; the client becomes the [`BrokerLink`]. Requests use
//! the `try_` variants so the task polling the event loop can issue them
//! without waiting on its own request queue. That includes DISCONNECT: a
//! blocking `disconnect()` on a full queue would never return once nothing
//! polls the event loop.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::debug;

use super::{BrokerError, BrokerLink, Result, Transport, TransportEvent};
use crate::config::BrokerConfig;

/// Capacity of the request queue between the link and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Event-loop half of an MQTT connection.
pub struct MqttTransport {
    eventloop: EventLoop,
}

/// Request half of an MQTT connection.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttTransport {
    /// Build both halves. No I/O happens until the transport is polled.
    pub fn new(config: &BrokerConfig) -> (Self, MqttLink) {
        let (client, eventloop) = AsyncClient::new(options(config), REQUEST_CAPACITY);
        (Self { eventloop }, MqttLink { client })
    }
}

fn options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    if !config.username.is_empty() {
        options.set_credentials(&config.username, &config.password);
    }
    options
}

/// Translate a raw rumqttc event.
pub(crate) fn map_event(event: Event) -> TransportEvent {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => TransportEvent::Connected,
        Event::Incoming(Packet::Publish(publish)) => TransportEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
        },
        Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
            TransportEvent::Disconnected
        }
        _ => TransportEvent::Other,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn poll(&mut self) -> Result<TransportEvent> {
        match self.eventloop.poll().await {
            Ok(event) => Ok(map_event(event)),
            Err(e) => Err(BrokerError::Connection(e.to_string())),
        }
    }
}

impl BrokerLink for MqttLink {
    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| BrokerError::Subscription(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    fn disconnect(&self) -> Result<()> {
        debug!("Requesting broker disconnect");
        self.client
            .try_disconnect()
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}
