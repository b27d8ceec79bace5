//! Mock broker implementations for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{BrokerError, BrokerLink, Publisher, Result, Transport, TransportEvent};

/// Transport that replays events pushed through its [`MockTransportHandle`].
///
/// Polling waits while nothing is scripted, like an idle network connection.
pub struct MockTransport {
    events: mpsc::UnboundedReceiver<Result<TransportEvent>>,
    polls: Arc<AtomicUsize>,
}

/// Scripts events for a [`MockTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    events: mpsc::UnboundedSender<Result<TransportEvent>>,
    polls: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let polls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                events: rx,
                polls: polls.clone(),
            },
            MockTransportHandle { events: tx, polls },
        )
    }
}

impl MockTransportHandle {
    pub fn connect(&self) {
        self.push(Ok(TransportEvent::Connected));
    }

    pub fn message(&self, topic: &str, payload: impl Into<Bytes>) {
        self.push(Ok(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        }));
    }

    /// Session closed.
    pub fn disconnect(&self) {
        self.push(Ok(TransportEvent::Disconnected));
    }

    /// Handshake failure or dropped session.
    pub fn fail(&self, reason: &str) {
        self.push(Err(BrokerError::Connection(reason.to_string())));
    }

    pub fn push(&self, event: Result<TransportEvent>) {
        let _ = self.events.send(event);
    }

    /// Number of events the transport has handed out.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn poll(&mut self) -> Result<TransportEvent> {
        match self.events.recv().await {
            Some(event) => {
                self.polls.fetch_add(1, Ordering::SeqCst);
                event
            }
            None => std::future::pending().await,
        }
    }
}

/// Link that records requests instead of sending them.
///
/// When built with [`MockLink::with_transport`], a disconnect request is echoed
/// back through that transport as [`TransportEvent::Disconnected`], the way a
/// real event loop reports the DISCONNECT it wrote.
#[derive(Default)]
pub struct MockLink {
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail_on_subscribe: AtomicBool,
    fail_on_publish: AtomicBool,
    fail_on_disconnect: AtomicBool,
    disconnected: AtomicBool,
    transport: Option<MockTransportHandle>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: MockTransportHandle) -> Self {
        Self {
            transport: Some(transport),
            ..Self::default()
        }
    }

    pub fn set_fail_on_disconnect(&self, fail: bool) {
        self.fail_on_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_subscribe(&self, fail: bool) {
        self.fail_on_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.published).clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl BrokerLink for MockLink {
    fn subscribe(&self, topic: &str) -> Result<()> {
        if self.fail_on_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscription("Mock subscribe failure".to_string()));
        }
        lock(&self.subscriptions).push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        lock(&self.published).push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        if self.fail_on_disconnect.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("Mock request queue full".to_string()));
        }
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(transport) = &self.transport {
            transport.disconnect();
        }
        Ok(())
    }
}

/// Publisher with a settable connection flag.
pub struct MockPublisher {
    connected: AtomicBool,
    fail_on_publish: AtomicBool,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_on_publish: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.published).clone()
    }

    pub fn published_count(&self) -> usize {
        lock(&self.published).len()
    }
}

impl Publisher for MockPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        lock(&self.published).push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
