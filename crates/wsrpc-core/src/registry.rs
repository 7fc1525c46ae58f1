//! Method registry: name -> async handler, per endpoint.
//!
//! Registration replaces, lookup is lock-free, and mutation during dispatch
//! is allowed (a dispatch observes either the old or the new handler).

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::HandlerError;

/// What a handler produces: a result value or a handler error.
pub type MethodResult = std::result::Result<Value, HandlerError>;

pub(crate) type Handler<P> =
    Arc<dyn Fn(P, Option<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Mapping from method name to handler closure. `P` is the peer handed to
/// handlers: the session on a server, the client on a client.
pub struct MethodRegistry<P> {
    methods: DashMap<String, Handler<P>>,
}

impl<P: Send + 'static> MethodRegistry<P> {
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Registers a handler, replacing any previous one under the same name.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(P, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let erased: Handler<P> = Arc::new(move |peer, params| Box::pin(handler(peer, params)));
        self.methods.insert(name.into(), erased);
    }

    /// Removes a handler; true iff it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    pub fn clear(&self) {
        self.methods.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.methods.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Handler<P>> {
        self.methods.get(name).map(|e| e.value().clone())
    }
}

impl<P: Send + 'static> Default for MethodRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
