//! The server: session table, WebSocket transport, heartbeat and fan-out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use wsrpc_core::registry::MethodResult;
use wsrpc_core::{
    Engine, Envelope, ErrorObject, EventBus, Frame, MethodRegistry, Result, RpcError,
    error::SharedError,
};

use crate::config::ServerConfig;
use crate::session::{Outbound, PongState, Session};

/// Server-level events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening(SocketAddr),
    Connection(Session),
    Error(SharedError),
    ErrorResponse { session: Session, response: Envelope },
    NotificationError { session: Session, error: ErrorObject },
}

struct Running {
    cancel: CancellationToken,
    serve: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    addr: SocketAddr,
}

struct ServerInner {
    cfg: ServerConfig,
    sessions: DashMap<String, Session>,
    methods: Arc<MethodRegistry<Session>>,
    engine: Engine<Session>,
    events: EventBus<ServerEvent>,
    last_ping_at: AtomicU64,
    running: Mutex<Option<Running>>,
}

/// A JSON-RPC server multiplexing many peer connections. Clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Result<Self> {
        cfg.validate()?;
        let methods = Arc::new(MethodRegistry::new());
        let engine = Engine::new(methods.clone(), cfg.version_check);
        Ok(Self {
            inner: Arc::new(ServerInner {
                cfg,
                sessions: DashMap::new(),
                methods,
                engine,
                events: EventBus::default(),
                last_ping_at: AtomicU64::new(0),
                running: Mutex::new(None),
            }),
        })
    }

    /// Registers a method handler; handlers receive the originating session.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Session, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MethodResult> + Send + 'static,
    {
        self.inner.methods.register(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.methods.unregister(name)
    }

    pub fn clear_methods(&self) {
        self.inner.methods.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Binds the listener, starts serving upgrades and starts the heartbeat.
    /// Errors if already open.
    pub async fn open(&self) -> Result<SocketAddr> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(RpcError::AlreadyOpen);
        }

        let listener = TcpListener::bind(&self.inner.cfg.listen)
            .await
            .map_err(|e| RpcError::Transport(format!("bind {}: {e}", self.inner.cfg.listen)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let cancel = CancellationToken::new();
        let app = Router::new()
            .route("/", get(ws_upgrade))
            .with_state(self.clone());

        let serve_cancel = cancel.clone();
        let serve = tokio::spawn(async move {
            let shutdown = async move { serve_cancel.cancelled().await };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(%err, "serve failed");
            }
        });

        self.inner.last_ping_at.store(now_ms(), Ordering::Relaxed);
        let hb_server = self.clone();
        let hb_cancel = cancel.clone();
        let heartbeat = tokio::spawn(async move { hb_server.heartbeat_loop(hb_cancel).await });

        *running = Some(Running {
            cancel,
            serve,
            heartbeat,
            addr,
        });
        drop(running);

        tracing::info!(%addr, "wsrpc server listening");
        self.inner.events.emit(ServerEvent::Listening(addr));
        Ok(addr)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Stops the heartbeat, terminates every session, shuts the listener
    /// down and empties the session table. Idempotent once closed.
    pub async fn close(&self) {
        let running = self.inner.running.lock().await.take();
        let Some(running) = running else { return };

        for session in self.snapshot() {
            session.terminate();
        }
        running.cancel.cancel();
        let _ = running.heartbeat.await;
        let _ = running.serve.await;
        self.inner.sessions.clear();
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<Session> {
        self.snapshot()
    }

    /// Snapshot of the sessions currently in `room`, keyed by id. The
    /// snapshot does not track later joins or leaves.
    pub fn in_room(&self, room: &str) -> HashMap<String, Session> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().in_room(room))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Notifies every connected session. The envelope is encoded once.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = Frame::text(Envelope::notification(method, params).to_value().to_string());
        self.fanout(self.snapshot(), frame).await;
        Ok(())
    }

    /// Notifies the members of one room.
    pub async fn notify_to(&self, room: &str, method: &str, params: Option<Value>) -> Result<()> {
        let frame = Frame::text(Envelope::notification(method, params).to_value().to_string());
        let targets = self.room_snapshot(room);
        self.fanout(targets, frame).await;
        Ok(())
    }

    /// Sends an arbitrary frame to the members of one room.
    pub async fn send_to(&self, room: &str, frame: Frame) -> Result<()> {
        let targets = self.room_snapshot(room);
        self.fanout(targets, frame).await;
        Ok(())
    }

    fn snapshot(&self) -> Vec<Session> {
        self.inner.sessions.iter().map(|e| e.value().clone()).collect()
    }

    fn room_snapshot(&self, room: &str) -> Vec<Session> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().in_room(room))
            .map(|e| e.value().clone())
            .collect()
    }

    async fn fanout(&self, targets: Vec<Session>, frame: Frame) {
        let mut futs = FuturesUnordered::new();
        for session in targets {
            let frame = frame.clone();
            futs.push(async move {
                let _ = session.send(frame).await;
            });
        }
        while futs.next().await.is_some() {}
    }

    async fn heartbeat_loop(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.inner.cfg.ping_interval_ms));
        tick.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.heartbeat_tick();
        }
    }

    /// One heartbeat pass: terminate sessions with no pong since the last
    /// ping window, then ping the survivors.
    fn heartbeat_tick(&self) {
        let deadline =
            self.inner.last_ping_at.load(Ordering::Relaxed) + self.inner.cfg.ping_timeout_ms;
        for session in self.snapshot() {
            let silent = match session.pong_state() {
                PongState::Pending => true,
                PongState::At(at) => at > deadline,
                PongState::Never => false,
            };
            if silent {
                tracing::debug!(session = %session.id(), "heartbeat: terminating silent session");
                session.terminate();
                continue;
            }
            session.mark_ping_pending();
            session.ping();
        }
        self.inner.last_ping_at.store(now_ms(), Ordering::Relaxed);
    }

    async fn run_session(self, socket: WebSocket) {
        let cfg = &self.inner.cfg;
        let (out_tx, out_rx) = mpsc::channel(cfg.send_queue);
        let cancel = CancellationToken::new();
        let session = Session::new(out_tx, cancel.clone(), self.inner.events.clone());
        let span = tracing::info_span!("session", id = %session.id());

        self.inner
            .sessions
            .insert(session.id().to_owned(), session.clone());
        self.inner.events.emit(ServerEvent::Connection(session.clone()));

        let (ws_tx, ws_rx) = socket.split();
        let writer = tokio::spawn(write_loop(ws_tx, out_rx, cancel.clone()));

        self.read_loop(&session, ws_rx, &cancel).instrument(span).await;

        cancel.cancel();
        let _ = writer.await;

        session.mark_closed();
        self.inner.sessions.remove(session.id());
        session.emit_close();
    }

    async fn read_loop(
        &self,
        session: &Session,
        mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
        cancel: &CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = ws_rx.next() => msg,
            };
            let frame = match msg {
                Some(Ok(Message::Text(text))) => Frame::text(text),
                Some(Ok(Message::Binary(bytes))) => Frame::binary(bytes),
                Some(Ok(Message::Pong(_))) => {
                    session.record_pong(now_ms());
                    continue;
                }
                // The transport answers pings on its own.
                Some(Ok(Message::Ping(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    self.inner
                        .events
                        .emit(ServerEvent::Error(Arc::new(RpcError::Transport(err.to_string()))));
                    break;
                }
            };
            // Terminate must cut a stalled handler, so dispatch races the
            // cancellation token.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.engine.handle(session, frame) => {}
            }
        }
    }
}

async fn write_loop(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        let out = tokio::select! {
            _ = cancel.cancelled() => break,
            out = out_rx.recv() => out,
        };
        match out {
            Some(Outbound::Frame(frame)) => {
                if ws_tx.send(frame_to_message(frame)).await.is_err() {
                    break;
                }
            }
            Some(Outbound::Ping(payload)) => {
                if ws_tx.send(Message::Ping(payload)).await.is_err() {
                    break;
                }
            }
            Some(Outbound::Close(frame)) => {
                let _ = ws_tx.send(Message::Close(frame)).await;
                break;
            }
            None => break,
        }
    }
}

fn frame_to_message(frame: Frame) -> Message {
    if frame.binary {
        Message::Binary(frame.payload.to_vec())
    } else {
        Message::Text(String::from_utf8_lossy(&frame.payload).into_owned())
    }
}

async fn ws_upgrade(State(server): State<Server>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| server.run_session(socket))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
