//! Caller-side bookkeeping for requests awaiting a response.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use wsrpc_core::ErrorObject;

/// How a call ended: the peer's result, or the peer's error object.
pub type CallOutcome = std::result::Result<Value, ErrorObject>;

/// Map from outbound request id to the caller's completion handle. Ids are
/// integers from a monotone counter starting at 0; the per-call timeout is
/// enforced at the await site, which removes the entry on expiry.
#[derive(Default)]
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: DashMap<u64, oneshot::Sender<CallOutcome>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next request id and records the completion handle.
    pub fn register(&self) -> (u64, oneshot::Receiver<CallOutcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, tx);
        (id, rx)
    }

    /// Completes a call; false when the id is unknown (already timed out,
    /// never ours, or a duplicate response).
    pub fn resolve(&self, id: u64, outcome: CallOutcome) -> bool {
        match self.calls.remove(&id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drops a call without completing it (timeout path).
    pub fn remove(&self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Fails every in-flight call; their futures observe a closed channel.
    pub fn fail_all(&self) {
        self.calls.clear();
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn ids_are_monotone_from_zero() {
        let pending = PendingCalls::new();
        let (a, _ra) = pending.register();
        let (b, _rb) = pending.register();
        let (c, _rc) = pending.register();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[tokio::test]
    async fn resolve_completes_the_future_and_clears_the_entry() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();
        assert!(pending.resolve(id, Ok(json!("done"))));
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
        assert!(pending.is_empty());
        assert!(!pending.resolve(id, Ok(json!("again"))));
    }

    #[tokio::test]
    async fn fail_all_rejects_every_future() {
        let pending = PendingCalls::new();
        let (_a, ra) = pending.register();
        let (_b, rb) = pending.register();
        pending.fail_all();
        assert!(pending.is_empty());
        assert!(ra.await.is_err());
        assert!(rb.await.is_err());
    }

    #[tokio::test]
    async fn remove_leaves_no_entry_behind() {
        let pending = PendingCalls::new();
        let (id, rx) = pending.register();
        assert!(pending.remove(id));
        assert_eq!(pending.len(), 0);
        assert!(rx.await.is_err());
    }
}
