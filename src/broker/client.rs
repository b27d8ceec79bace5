//! Broker connection state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{
    BrokerError, BrokerLink, ConnectionState, InboundMessage, Publisher, Result, Transport,
    TransportEvent,
};
use crate::config::BrokerConfig;
use crate::utils::retry::Backoff;
use crate::utils::shutdown;

/// How long shutdown keeps polling the transport to write our DISCONNECT.
pub const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns the broker session.
///
/// [`BrokerClient::run`] drives the transport until cancelled, maintaining the
/// connection state and forwarding every inbound message onto the ingest FIFO.
/// Publishing goes through the shared link and is refused unless connected.
pub struct BrokerClient {
    link: Arc<dyn BrokerLink>,
    subscribe_topic: String,
    backoff_floor: Duration,
    backoff_ceiling: Duration,
    disconnect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig, link: Arc<dyn BrokerLink>) -> Self {
        Self::with_backoff(
            link,
            config.subscribe_topic.clone(),
            config.backoff_floor(),
            config.backoff_ceiling(),
        )
    }

    pub fn with_backoff(
        link: Arc<dyn BrokerLink>,
        subscribe_topic: impl Into<String>,
        backoff_floor: Duration,
        backoff_ceiling: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link,
            subscribe_topic: subscribe_topic.into(),
            backoff_floor,
            backoff_ceiling,
            disconnect_timeout: DISCONNECT_FLUSH_TIMEOUT,
            state,
        }
    }

    /// Bound on flushing the DISCONNECT during shutdown.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Broker state changed");
        }
    }

    /// Drive the transport until `shutdown` fires.
    ///
    /// Dropping `inbound` on return tells the ingestor no more messages follow.
    pub async fn run<T: Transport>(
        &self,
        mut transport: T,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new(self.backoff_floor, self.backoff_ceiling);
        self.set_state(ConnectionState::Connecting);
        info!(topic = %self.subscribe_topic, "Broker client started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown::cancelled(&mut shutdown) => break,
                event = transport.poll() => event,
            };

            match event {
                Ok(TransportEvent::Connected) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to broker");
                    self.resubscribe();
                }
                Ok(TransportEvent::Message { topic, payload }) => {
                    if inbound.send(InboundMessage { topic, payload }).is_err() {
                        error!("Ingest queue closed, stopping broker client");
                        break;
                    }
                }
                Ok(TransportEvent::Disconnected) => {
                    if self.state() == ConnectionState::Connected {
                        warn!("Broker closed the session, reconnecting");
                        self.set_state(ConnectionState::Reconnecting);
                    }
                }
                Ok(TransportEvent::Other) => {}
                Err(e) => {
                    if self.state() == ConnectionState::Connected {
                        warn!(error = %e, "Broker connection lost, reconnecting");
                        self.set_state(ConnectionState::Reconnecting);
                        continue;
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        state = %self.state(),
                        delay_ms = delay.as_millis() as u64,
                        "Broker connection failed, backing off"
                    );
                    if shutdown::sleep_or_cancelled(delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.close_session(&mut transport, &inbound).await;
        self.set_state(ConnectionState::Disconnected);
        info!("Broker client stopped");
    }

    /// Send a graceful DISCONNECT if a session is up.
    ///
    /// The request only leaves the process while the transport is polled, so
    /// poll until it is reported written, bounded by `disconnect_timeout`.
    async fn close_session<T: Transport>(
        &self,
        transport: &mut T,
        inbound: &mpsc::UnboundedSender<InboundMessage>,
    ) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        if let Err(e) = self.link.disconnect() {
            warn!(error = %e, "Broker disconnect could not be queued");
            return;
        }

        let flush = async {
            loop {
                match transport.poll().await {
                    Ok(TransportEvent::Message { topic, payload }) => {
                        let _ = inbound.send(InboundMessage { topic, payload });
                    }
                    Ok(TransportEvent::Disconnected) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(self.disconnect_timeout, flush)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.disconnect_timeout.as_millis() as u64,
                "Broker disconnect not flushed in time"
            );
        }
    }

    fn resubscribe(&self) {
        match self.link.subscribe(&self.subscribe_topic) {
            Ok(()) => info!(topic = %self.subscribe_topic, "Subscribed"),
            Err(e) => error!(topic = %self.subscribe_topic, error = %e, "Subscribe failed"),
        }
    }
}

impl Publisher for BrokerClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(BrokerError::NotConnected);
        }
        self.link.publish(topic, payload)
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
