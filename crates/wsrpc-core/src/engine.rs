//! The message-pair engine: parse -> validate -> classify -> dispatch.
//!
//! Identical on both endpoints; only the peer type differs. The engine is the
//! sole producer of wire-visible error objects. Batch items are processed
//! sequentially so response order matches request order on one connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::codec::{self, Frame, Incoming};
use crate::error::{ErrorCode, ErrorObject, HandlerError};
use crate::protocol::{Envelope, Id, VersionCheck};
use crate::registry::MethodRegistry;

/// Events the engine surfaces through the peer; each endpoint fans them into
/// its own event enum.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Any inbound envelope classified as a response.
    Response(Envelope),
    /// A response carrying a non-null id (a reply to one of our calls).
    MethodResponse(Envelope),
    /// An inbound error response with a null id.
    ErrorResponse(Envelope),
    /// A null-id error outside the parse/invalid-request band: a peer is
    /// telling us one of our notifications failed.
    NotificationError(ErrorObject),
}

/// The capability set the engine needs from an endpoint.
#[async_trait]
pub trait Peer: Clone + Send + Sync + 'static {
    /// Writes a frame back to this peer. Failures are the endpoint's to
    /// log; the engine has nothing further to do with them.
    async fn send_frame(&self, frame: Frame);

    /// Surfaces an engine event on the endpoint's bus.
    fn emit(&self, event: EngineEvent);
}

/// The parser/dispatcher shared by server sessions and clients.
pub struct Engine<P: Peer> {
    methods: Arc<MethodRegistry<P>>,
    version_check: VersionCheck,
}

impl<P: Peer> Engine<P> {
    pub fn new(methods: Arc<MethodRegistry<P>>, version_check: VersionCheck) -> Self {
        Self {
            methods,
            version_check,
        }
    }

    pub fn version_check(&self) -> VersionCheck {
        self.version_check
    }

    /// Handles one inbound frame, sending back at most one frame (a single
    /// response or a batch response) in the same modality.
    pub async fn handle(&self, peer: &P, frame: Frame) {
        let binary = frame.binary;
        let incoming = match codec::decode(&frame) {
            Ok(incoming) => incoming,
            Err(error) => {
                let reply = Envelope::failure(Id::Null, error).to_value();
                peer.send_frame(codec::encode(&reply, binary)).await;
                return;
            }
        };

        let (items, batched) = match incoming {
            Incoming::Single(v) => (vec![v], false),
            Incoming::Batch(items) => (items, true),
        };

        let mut replies = Vec::new();
        for item in &items {
            if let Some(reply) = self.process_one(peer, item).await {
                replies.push(reply);
            }
        }

        if replies.is_empty() {
            return;
        }
        let out = if batched {
            Value::Array(replies)
        } else {
            // Single input produces at most one reply.
            match replies.pop() {
                Some(v) => v,
                None => return,
            }
        };
        peer.send_frame(codec::encode(&out, binary)).await;
    }

    /// Processes one envelope; `Some` is the reply value for this item.
    async fn process_one(&self, peer: &P, item: &Value) -> Option<Value> {
        // The reply id is whatever usable id the item carried, else null.
        let reply_id = item
            .get("id")
            .and_then(Id::from_value)
            .unwrap_or(Id::Null);

        let envelope = match Envelope::from_value(item, self.version_check) {
            Ok(envelope) => envelope,
            Err(error) => return Some(Envelope::failure(reply_id, error).to_value()),
        };

        match envelope {
            Envelope::Success { .. } | Envelope::Failure { .. } => self.observe_response(peer, envelope),
            Envelope::Request { id, method, params } => {
                Some(self.dispatch_request(peer, id, &method, params).await)
            }
            Envelope::Notification { method, params } => {
                self.dispatch_notification(peer, &method, params).await
            }
        }
    }

    /// Response branch. A reply to a reply is never produced, except for
    /// null-id garbage that only looks like a response.
    fn observe_response(&self, peer: &P, envelope: Envelope) -> Option<Value> {
        peer.emit(EngineEvent::Response(envelope.clone()));

        let id = match envelope.id() {
            Some(id) => id.clone(),
            None => return None,
        };
        if id != Id::Null {
            peer.emit(EngineEvent::MethodResponse(envelope));
            return None;
        }

        match envelope {
            // id:null success has no error to report and no caller to find.
            Envelope::Success { .. } => {
                Some(Envelope::failure(Id::Null, ErrorObject::invalid_request()).to_value())
            }
            Envelope::Failure { error, .. } => {
                peer.emit(EngineEvent::ErrorResponse(Envelope::Failure {
                    id: Id::Null,
                    error: error.clone(),
                }));
                // The parse/invalid-request band is absorbed: that peer is
                // reporting our own malformed traffic back to us.
                if !error.is_code(ErrorCode::ParseError) && !error.is_code(ErrorCode::InvalidRequest) {
                    peer.emit(EngineEvent::NotificationError(error));
                }
                None
            }
            _ => None,
        }
    }

    async fn dispatch_request(&self, peer: &P, id: Id, method: &str, params: Option<Value>) -> Value {
        let Some(handler) = self.methods.get(method) else {
            return Envelope::failure(id, ErrorObject::method_not_found()).to_value();
        };
        match (handler.as_ref())(peer.clone(), params).await {
            Ok(result) => Envelope::success(id, result).to_value(),
            Err(HandlerError::Rpc(error)) => Envelope::failure(id, error).to_value(),
            Err(HandlerError::Failed { kind, detail }) => {
                Envelope::failure(id, ErrorObject::server_error(&kind, &detail)).to_value()
            }
        }
    }

    /// Call branch without an id. Grammar-level failures above already
    /// replied; an unknown method still replies (that is what feeds the
    /// sender's `notification_error`), but handler outcomes are dropped.
    async fn dispatch_notification(&self, peer: &P, method: &str, params: Option<Value>) -> Option<Value> {
        let Some(handler) = self.methods.get(method) else {
            return Some(Envelope::failure(Id::Null, ErrorObject::method_not_found()).to_value());
        };
        if let Err(err) = (handler.as_ref())(peer.clone(), params).await {
            tracing::debug!(method, ?err, "notification handler failed");
        }
        None
    }
}

impl<P: Peer> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            methods: self.methods.clone(),
            version_check: self.version_check,
        }
    }
}
