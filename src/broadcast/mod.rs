//! Fan-out of processed events to live subscribers.
//!
//! Each subscriber owns a FIFO [`queue`]; the broadcaster keeps the registry of
//! open sessions and pushes every event onto each of them. Delivery is
//! fire-and-forget: a slow subscriber only affects its own queue, bounded by the
//! configured [`OverflowPolicy`].

mod queue;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StreamingConfig;
use queue::{Offer, Pop, SessionQueue};

/// What happens when an event arrives for a subscriber whose queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending event to make room.
    DropOldest,
    /// Discard the incoming event for that subscriber.
    DropNewest,
    /// Never discard; memory grows with the backlog.
    Unbounded,
}

/// Broadcaster settings.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub keepalive: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for BroadcastConfig {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            overflow: config.overflow,
            keepalive: config.keepalive(),
        }
    }
}

/// Item yielded to a live subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(Value),
    /// Idle keepalive, carries no payload.
    Ping,
}

struct Registry {
    config: BroadcastConfig,
    sessions: Mutex<HashMap<Uuid, Arc<SessionQueue>>>,
    shut_down: AtomicBool,
}

impl Registry {
    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<SessionQueue>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unregister(&self, id: Uuid) -> bool {
        let removed = self.sessions().remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                debug!(session = %id, dropped = queue.dropped(), "Subscriber unregistered");
                true
            }
            None => false,
        }
    }
}

/// Registry of live subscriber sessions.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            inner: Arc::new(Registry {
                config,
                sessions: Mutex::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.inner.config
    }

    /// Idle interval after which subscribers receive a ping.
    pub fn keepalive(&self) -> Duration {
        self.inner.config.keepalive
    }

    /// Open a new session.
    ///
    /// After [`Broadcaster::shutdown`] the returned subscription is already at
    /// end of stream.
    pub fn register(&self) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SessionQueue::new(
            self.inner.config.queue_capacity,
            self.inner.config.overflow,
        ));

        {
            let mut sessions = self.inner.sessions();
            // Checked under the registry lock so a concurrent shutdown cannot miss this session.
            if self.inner.shut_down.load(Ordering::SeqCst) {
                queue.close();
            } else {
                sessions.insert(id, queue.clone());
                debug!(session = %id, subscribers = sessions.len(), "Subscriber registered");
            }
        }

        Subscription {
            id,
            queue,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Enqueue `event` on every registered session.
    ///
    /// Returns how many sessions accepted it.
    pub fn send_event(&self, event: Value) -> usize {
        let targets: Vec<(Uuid, Arc<SessionQueue>)> = self
            .inner
            .sessions()
            .iter()
            .map(|(id, queue)| (*id, queue.clone()))
            .collect();

        let mut delivered = 0;
        for (id, queue) in targets {
            match queue.offer(event.clone()) {
                Offer::Queued => delivered += 1,
                Offer::Evicted => {
                    delivered += 1;
                    if queue.dropped() == 1 {
                        warn!(session = %id, "Subscriber queue full, dropping oldest events");
                    }
                }
                Offer::Rejected => {
                    if queue.dropped() == 1 {
                        warn!(session = %id, "Subscriber queue full, dropping new events");
                    }
                }
                Offer::Closed => {}
            }
        }
        delivered
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn unregister(&self, id: Uuid) -> bool {
        self.inner.unregister(id)
    }

    /// End every session and refuse new ones.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<SessionQueue>> = {
            let mut sessions = self.inner.sessions();
            self.inner.shut_down.store(true, Ordering::SeqCst);
            sessions.drain().map(|(_, queue)| queue).collect()
        };

        for queue in &drained {
            queue.close();
        }
        info!(sessions = drained.len(), "Broadcaster shut down");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

/// Consumer handle for one session.
///
/// Dropping it unregisters the session.
pub struct Subscription {
    id: Uuid,
    queue: Arc<SessionQueue>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Events waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Next queued event without waiting.
    ///
    /// `None` when the queue is empty or the stream has ended.
    pub fn try_next(&self) -> Option<Value> {
        match self.queue.pop() {
            Pop::Event(event) => Some(event),
            Pop::Empty | Pop::Ended => None,
        }
    }

    /// Wait for the next event.
    ///
    /// Yields [`StreamEvent::Ping`] after `keepalive` without traffic and
    /// `None` once the session has ended.
    pub async fn next(&mut self, keepalive: Duration) -> Option<StreamEvent> {
        loop {
            match self.queue.pop() {
                Pop::Event(event) => return Some(StreamEvent::Message(event)),
                Pop::Ended => return None,
                Pop::Empty => {}
            }

            if tokio::time::timeout(keepalive, self.queue.wait())
                .await
                .is_err()
            {
                return Some(StreamEvent::Ping);
            }
        }
    }

    /// Adapt into a stream that ends with the session.
    pub fn into_stream(
        self,
        keepalive: Duration,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>> {
        Box::pin(futures::stream::unfold(
            self,
            move |mut subscription| async move {
                let event = subscription.next(keepalive).await?;
                Some((event, subscription))
            },
        ))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}
