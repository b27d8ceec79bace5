//! Per-subscriber FIFO.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::Notify;

use super::OverflowPolicy;

/// Outcome of offering an event to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    /// Queued after evicting the oldest pending event.
    Evicted,
    /// Discarded because the queue was full.
    Rejected,
    Closed,
}

pub(crate) enum Pop {
    Event(Value),
    Empty,
    Ended,
}

#[derive(Default)]
struct State {
    events: VecDeque<Value>,
    closed: bool,
    dropped: u64,
}

/// Pending events for one live subscriber.
///
/// Producers never wait: a full queue is handled by the overflow policy. The
/// single consumer waits on `notify`, whose stored permit covers a push that
/// lands between an empty pop and the wait.
pub(crate) struct SessionQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl SessionQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn offer(&self, event: Value) -> Offer {
        let offer = {
            let mut state = self.lock();
            if state.closed {
                return Offer::Closed;
            }

            let full =
                self.policy != OverflowPolicy::Unbounded && state.events.len() >= self.capacity;
            if !full {
                state.events.push_back(event);
                Offer::Queued
            } else if self.policy == OverflowPolicy::DropOldest {
                state.events.pop_front();
                state.events.push_back(event);
                state.dropped += 1;
                Offer::Evicted
            } else {
                state.dropped += 1;
                Offer::Rejected
            }
        };

        if offer != Offer::Rejected {
            self.notify.notify_one();
        }
        offer
    }

    /// Mark end of stream. Events already queued are still delivered.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Pop {
        let mut state = self.lock();
        match state.events.pop_front() {
            Some(event) => Pop::Event(event),
            None if state.closed => Pop::Ended,
            None => Pop::Empty,
        }
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
