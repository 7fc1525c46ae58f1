//! One server-side peer: id, rooms, user data, pong tracking, send path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::CloseFrame;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wsrpc_core::{
    Envelope, EngineEvent, ErrorObject, EventBus, Frame, Peer, Result,
};

use crate::server::ServerEvent;

/// Events observable on one session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The underlying transport closed; the session is gone from the table.
    Close,
    /// An inbound null-id error response arrived on this connection.
    ErrorResponse(Envelope),
    /// The peer reported a failed notification (code outside the
    /// parse/invalid-request band).
    NotificationError(ErrorObject),
}

/// Heartbeat state for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongState {
    /// No ping issued yet.
    Never,
    /// Ping sent, pong not yet observed.
    Pending,
    /// Last pong at this unix-millisecond timestamp.
    At(u64),
}

// Lock-free encoding of PongState in one atomic.
const PONG_NEVER: u64 = 0;
const PONG_PENDING: u64 = u64::MAX;

pub(crate) enum Outbound {
    Frame(Frame),
    Ping(Vec<u8>),
    Close(Option<CloseFrame<'static>>),
}

struct SessionInner {
    id: String,
    rooms: DashSet<String>,
    data: DashMap<String, Value>,
    pong: AtomicU64,
    open: AtomicBool,
    out_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    events: EventBus<SessionEvent>,
    server_events: EventBus<ServerEvent>,
}

/// Cheap handle to one connected peer. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.id).finish()
    }
}

impl Session {
    pub(crate) fn new(
        out_tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
        server_events: EventBus<ServerEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4().to_string(),
                rooms: DashSet::new(),
                data: DashMap::new(),
                pong: AtomicU64::new(PONG_NEVER),
                open: AtomicBool::new(true),
                out_tx,
                cancel,
                events: EventBus::default(),
                server_events,
            }),
        }
    }

    /// Stable UUIDv4 id, unique within a server instance.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Relaxed)
    }

    /// Writes a frame to this peer. A no-op once the underlying socket left
    /// the OPEN state.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        if self.inner.out_tx.send(Outbound::Frame(frame)).await.is_err() {
            self.inner.open.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Builds a notification envelope and sends it as text.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = Frame::text(Envelope::notification(method, params).to_value().to_string());
        self.send(frame).await
    }

    /// Idempotent add; true iff newly added.
    pub fn join_to(&self, room: &str) -> bool {
        self.inner.rooms.insert(room.to_owned())
    }

    /// True iff the session was a member.
    pub fn leave_from(&self, room: &str) -> bool {
        self.inner.rooms.remove(room).is_some()
    }

    pub fn leave_from_all(&self) {
        self.inner.rooms.clear();
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.inner.rooms.contains(room)
    }

    pub fn rooms(&self) -> Vec<String> {
        self.inner.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// User-owned scratch state, keyed by string.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.inner.data.insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.inner.data.get(key).map(|e| e.value().clone())
    }

    /// Polite close handshake.
    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        let frame = CloseFrame {
            code: code.unwrap_or(1000),
            reason: reason.unwrap_or_default().into(),
        };
        let _ = self.inner.out_tx.try_send(Outbound::Close(Some(frame)));
    }

    /// Abortive close: the connection task drops the socket without a
    /// handshake.
    pub fn terminate(&self) {
        self.inner.open.store(false, Ordering::Relaxed);
        self.inner.cancel.cancel();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn pong_state(&self) -> PongState {
        match self.inner.pong.load(Ordering::Relaxed) {
            PONG_NEVER => PongState::Never,
            PONG_PENDING => PongState::Pending,
            at => PongState::At(at),
        }
    }

    pub(crate) fn record_pong(&self, now_ms: u64) {
        self.inner.pong.store(now_ms.clamp(1, u64::MAX - 1), Ordering::Relaxed);
    }

    pub(crate) fn mark_ping_pending(&self) {
        self.inner.pong.store(PONG_PENDING, Ordering::Relaxed);
    }

    pub(crate) fn ping(&self) {
        if self.is_open() {
            let _ = self.inner.out_tx.try_send(Outbound::Ping(Vec::new()));
        }
    }

    /// Post-close: rooms and data are cleared and no further sends succeed.
    pub(crate) fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Relaxed);
        self.inner.rooms.clear();
        self.inner.data.clear();
    }

    pub(crate) fn emit_close(&self) {
        self.inner.events.emit(SessionEvent::Close);
    }
}

#[async_trait]
impl Peer for Session {
    async fn send_frame(&self, frame: Frame) {
        if let Err(err) = self.send(frame).await {
            tracing::debug!(session = %self.id(), %err, "engine reply dropped");
        }
    }

    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Response(_) => {}
            EngineEvent::MethodResponse(envelope) => {
                // The server issues no calls; a correlated response here has
                // nothing to match.
                tracing::trace!(session = %self.id(), ?envelope, "unmatched response");
            }
            EngineEvent::ErrorResponse(envelope) => {
                self.inner.events.emit(SessionEvent::ErrorResponse(envelope.clone()));
                self.inner.server_events.emit(ServerEvent::ErrorResponse {
                    session: self.clone(),
                    response: envelope,
                });
            }
            EngineEvent::NotificationError(error) => {
                self.inner.events.emit(SessionEvent::NotificationError(error.clone()));
                self.inner.server_events.emit(ServerEvent::NotificationError {
                    session: self.clone(),
                    error,
                });
            }
        }
    }
}
