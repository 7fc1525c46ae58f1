//! Small typed publish/subscribe used by every endpoint.
//!
//! Each endpoint declares its own variant-per-event enum and owns one bus per
//! surface. Emitting with no subscribers is fine; slow subscribers observe
//! `Lagged` per tokio broadcast semantics.

use tokio::sync::broadcast;

pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(64)
    }
}
