//! Notification bus and pending queue.
//!
//! Refresh and build-error notifications flow through a single broker.
//! Sessions that are connected receive every publication immediately;
//! anything published while no session is attached is buffered and
//! handed to the next client that announces itself.
//!
//! Subscriber set and queue are mutated from the watch dispatcher, the
//! rebuild worker and each session thread, so both live behind one lock.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A notification distributed to live-reload sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// An output file changed; clients should refresh `path`
    /// (relative to the output directory).
    Refresh(String),

    /// A rebuild failed; clients should display `message`.
    Error(String),
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<(u64, Sender<Notification>)>,
    pending: VecDeque<Notification>,
}

/// Publish/subscribe broker shared by every component (see module docs).
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast to all subscribers; buffer when nobody is listening.
    pub fn publish(&self, note: Notification) {
        let mut inner = self.inner.lock();
        if inner.subscribers.is_empty() {
            inner.pending.push_back(note);
            return;
        }
        let mut delivered = false;
        inner.subscribers.retain(|(_, tx)| match tx.send(note.clone()) {
            Ok(()) => {
                delivered = true;
                true
            }
            // Receiving side is gone; the session leaked its handle.
            Err(_) => false,
        });
        if !delivered {
            inner.pending.push_back(note);
        }
    }

    /// Register a new subscriber. The handle unsubscribes when dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel::unbounded();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription {
            id,
            rx,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Remove and return every buffered notification, oldest first.
    pub fn take_pending(&self) -> Vec<Notification> {
        self.inner.lock().pending.drain(..).collect()
    }

    /// Put a notification back on the queue (a session saw it before its
    /// transport was ready).
    pub fn defer(&self, note: Notification) {
        self.inner.lock().pending.push_back(note);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

/// Live subscription to the bus. Dropping it removes the subscriber,
/// so a session cannot leak its registration on unclean disconnect.
pub struct Subscription {
    id: u64,
    rx: Receiver<Notification>,
    bus: Arc<Mutex<BusInner>>,
}

impl Subscription {
    /// Next delivered notification, if any is waiting.
    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.lock().subscribers.retain(|(id, _)| *id != self.id);
    }
}
