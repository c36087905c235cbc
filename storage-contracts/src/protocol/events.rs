// SPDX-License-Identifier: GPL-3.0-only

//! In-process event delivery
//!
//! Every publisher owns an [`EventBus`]. Consumers call
//! [`EventBus::subscribe`] and read events from the returned
//! [`Subscription`] at their own pace. Publishing never runs consumer code:
//! events are queued, so the publisher finishes its own bookkeeping no matter
//! what the consumer does. Dropping a subscription unsubscribes it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (sender, receiver) = mpsc::channel();
        self.lock().push(sender);
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<E>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Clone> EventBus<E> {
    /// Queues `event` for every live subscription; returns how many got it
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        subscribers.len()
    }
}

/// Receiving end of an [`EventBus`]
pub struct Subscription<E> {
    receiver: Receiver<E>,
}

impl<E> Subscription<E> {
    /// Next queued event, if any
    pub fn try_next(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event
    pub fn next_timeout(&self, timeout: Duration) -> Option<E> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All queued events
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}
