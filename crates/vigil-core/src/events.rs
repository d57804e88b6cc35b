//! Notification fan-out for UI observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

/// Event published to observers for display purposes only; nothing in the
/// coordinator reads these back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Presence transition as last reported by the presence source.
    Presence(bool),
    /// Seconds left on the pending lock countdown; `None` clears it.
    Countdown(Option<u64>),
    /// Authoritative lock state echoed from the session backend.
    Lock(bool),
}

/// Receiver half handed to each subscriber.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Identifier returned by [`NotificationBus::subscribe`].
pub type SubscriberId = u64;

/// Routes notifications to any number of observers.
///
/// Senders are unbounded, so publishing never blocks the publisher; a
/// lagging observer buffers instead of back-pressuring the event loop.
/// Emission iterates a snapshot of the subscriber map, so a subscriber
/// added or removed mid-publish does not invalidate the iteration.
#[derive(Clone)]
pub struct NotificationBus {
    subscribers: Arc<RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<Notification>>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new observer. Events published after this call are
    /// delivered in emission order.
    pub fn subscribe(&self) -> (SubscriberId, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.insert(id, tx);
        (id, rx)
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.remove(&id);
    }

    /// Deliver `event` to every current subscriber. A closed receiver is
    /// skipped, never an error.
    pub fn publish(&self, event: Notification) {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for tx in subs.values() {
            let _ = tx.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
