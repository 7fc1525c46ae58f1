//! The client: one outbound connection with reconnection and call tracking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use wsrpc_core::error::SharedError;
use wsrpc_core::registry::MethodResult;
use wsrpc_core::{
    Engine, EngineEvent, Envelope, ErrorObject, EventBus, Frame, Id, MethodRegistry, Peer, Result,
    RpcError,
};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::pending::PendingCalls;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Client-level events.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connecting,
    Connected,
    Disconnect { code: Option<u16>, reason: String },
    Close,
    Reconnecting(u32),
    ReconnectError(SharedError),
    ReconnectFailed,
    Reconnected(u32),
    ErrorResponse(Envelope),
    NotificationError(ErrorObject),
    UnknownResponse(Envelope),
    Error(SharedError),
}

struct ClientInner {
    url: String,
    cfg: ClientConfig,
    methods: Arc<MethodRegistry<Client>>,
    engine: Engine<Client>,
    pending: PendingCalls,
    events: EventBus<ClientEvent>,
    state: RwLock<ConnState>,
    out_tx: RwLock<Option<mpsc::UnboundedSender<Frame>>>,
    buffer: Mutex<VecDeque<Frame>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A JSON-RPC client over one WebSocket connection. Clones share state; the
/// client itself is the peer handed to its registered method handlers.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    pub fn new(url: impl Into<String>, cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;
        let methods = Arc::new(MethodRegistry::new());
        let engine = Engine::new(methods.clone(), cfg.version_check);
        let auto_connect = cfg.auto_connect;
        let client = Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                cfg,
                methods,
                engine,
                pending: PendingCalls::new(),
                events: EventBus::default(),
                state: RwLock::new(ConnState::Idle),
                out_tx: RwLock::new(None),
                buffer: Mutex::new(VecDeque::new()),
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        };
        if auto_connect {
            client.connect();
        }
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnState {
        *self.inner.state.read().unwrap()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a method callable by the remote peer.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Client, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MethodResult> + Send + 'static,
    {
        self.inner.methods.register(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.methods.unregister(name)
    }

    /// Spawns the connection task. A no-op while a task is running or after
    /// `disconnect`.
    pub fn connect(&self) {
        if self.inner.closed.load(Ordering::Relaxed) {
            return;
        }
        let mut task = self.inner.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let client = self.clone();
        *task = Some(tokio::spawn(async move { client.run().await }));
    }

    /// Issues a request and awaits its response, subject to the configured
    /// call timeout. While not connected the request is buffered when
    /// buffering is enabled, otherwise rejected immediately.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (id, rx) = self.inner.pending.register();
        let envelope = Envelope::request(Id::Num(id as i64), method, params);
        let frame = Frame::text(envelope.to_value().to_string());
        if !self.send_or_buffer(frame) {
            self.inner.pending.remove(id);
            return Err(RpcError::NotConnected);
        }

        let window = Duration::from_millis(self.inner.cfg.method_call_timeout_ms);
        match timeout(window, rx).await {
            Err(_) => {
                self.inner.pending.remove(id);
                Err(RpcError::CallTimeout)
            }
            Ok(Err(_)) => Err(RpcError::Closed),
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(RpcError::Remote(error)),
        }
    }

    /// Sends a notification; no response is ever expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = Frame::text(Envelope::notification(method, params).to_value().to_string());
        if self.send_or_buffer(frame) {
            Ok(())
        } else {
            Err(RpcError::NotConnected)
        }
    }

    /// Stops reconnection, fails all pending calls and closes the socket.
    /// Idempotent.
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.pending.fail_all();
        self.set_state(ConnState::Closed);
        self.inner.events.emit(ClientEvent::Disconnect {
            code: Some(1000),
            reason: "client disconnect".into(),
        });
        self.inner.events.emit(ClientEvent::Close);
    }

    /// In-flight call count, visible for tests and introspection.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    fn set_state(&self, state: ConnState) {
        *self.inner.state.write().unwrap() = state;
    }

    fn send_or_buffer(&self, frame: Frame) -> bool {
        let frame = {
            let guard = self.inner.out_tx.read().unwrap();
            match guard.as_ref() {
                Some(tx) => match tx.send(frame) {
                    Ok(()) => return true,
                    Err(err) => err.0,
                },
                None => frame,
            }
        };
        if let Some(capacity) = self.inner.cfg.buffer_capacity {
            let mut buffer = self.inner.buffer.lock().unwrap();
            if buffer.len() < capacity {
                buffer.push_back(frame);
                return true;
            }
        }
        false
    }

    fn flush_buffer(&self, tx: &mpsc::UnboundedSender<Frame>) {
        let mut buffer = self.inner.buffer.lock().unwrap();
        while let Some(frame) = buffer.pop_front() {
            if tx.send(frame).is_err() {
                break;
            }
        }
    }

    fn build_request(&self) -> Result<Request> {
        let mut url = self.inner.url.clone();
        if !self.inner.cfg.query.is_empty() {
            let mut sep = if url.contains('?') { '&' } else { '?' };
            for (key, value) in &self.inner.cfg.query {
                url.push(sep);
                url.push_str(key);
                url.push('=');
                url.push_str(value);
                sep = '&';
            }
        }
        let mut request = url
            .into_client_request()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        if !self.inner.cfg.protocols.is_empty() {
            let joined = self.inner.cfg.protocols.join(", ");
            let value = joined
                .parse()
                .map_err(|_| RpcError::Config("invalid subprotocol name".into()))?;
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(request)
    }

    /// Connection task body: connect, drive, back off, repeat.
    async fn run(self) {
        let cfg = &self.inner.cfg;
        let mut backoff = Backoff::new(
            Duration::from_millis(cfg.reconnection_delay_ms),
            Duration::from_millis(cfg.reconnection_delay_max_ms),
            cfg.reconnection_jitter,
        );
        let mut attempts: u32 = 0;
        let mut reconnecting = false;

        loop {
            self.set_state(ConnState::Connecting);
            self.inner.events.emit(ClientEvent::Connecting);

            let request = match self.build_request() {
                Ok(request) => request,
                Err(err) => {
                    self.inner.events.emit(ClientEvent::Error(Arc::new(err)));
                    self.give_up();
                    return;
                }
            };

            let connected = tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                connected = connect_async(request) => connected,
            };

            match connected {
                Ok((stream, _response)) => {
                    tracing::debug!(url = %self.inner.url, "websocket open");
                    if reconnecting {
                        self.inner.events.emit(ClientEvent::Reconnected(attempts));
                    } else {
                        self.inner.events.emit(ClientEvent::Connected);
                    }
                    attempts = 0;
                    reconnecting = false;
                    backoff.reset();

                    let (tx, rx) = mpsc::unbounded_channel();
                    self.flush_buffer(&tx);
                    *self.inner.out_tx.write().unwrap() = Some(tx);
                    self.set_state(ConnState::Open);

                    let (code, reason) = self.drive(stream, rx).await;

                    *self.inner.out_tx.write().unwrap() = None;
                    tracing::debug!(url = %self.inner.url, ?code, "websocket closed");

                    if self.inner.closed.load(Ordering::Relaxed) {
                        return;
                    }
                    if !cfg.reconnection {
                        self.inner.events.emit(ClientEvent::Disconnect { code, reason });
                        self.give_up();
                        return;
                    }
                    self.set_state(ConnState::Reconnecting);
                }
                Err(err) => {
                    let shared: SharedError = Arc::new(RpcError::Transport(err.to_string()));
                    if reconnecting {
                        self.inner.events.emit(ClientEvent::ReconnectError(shared));
                    } else {
                        self.inner.events.emit(ClientEvent::Error(shared));
                    }
                    if self.inner.closed.load(Ordering::Relaxed) {
                        return;
                    }
                    if !cfg.reconnection {
                        self.give_up();
                        return;
                    }
                    self.set_state(ConnState::Reconnecting);
                }
            }

            attempts = attempts.saturating_add(1);
            if attempts > cfg.reconnection_attempts {
                self.inner.events.emit(ClientEvent::ReconnectFailed);
                self.give_up();
                return;
            }
            let delay = backoff.duration();
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            self.inner.events.emit(ClientEvent::Reconnecting(attempts));
            reconnecting = true;
        }
    }

    /// Terminal failure from inside the connection task: no reconnection
    /// will follow.
    fn give_up(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.pending.fail_all();
        self.set_state(ConnState::Closed);
        self.inner.events.emit(ClientEvent::Close);
    }

    /// Pumps one open connection until it ends; returns close code/reason.
    async fn drive(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut out_rx: mpsc::UnboundedReceiver<Frame>,
    ) -> (Option<u16>, String) {
        let (mut ws_tx, mut ws_rx) = stream.split();
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return (None, String::new());
                }
                out = out_rx.recv() => match out {
                    Some(frame) => {
                        if ws_tx.send(frame_to_message(frame)).await.is_err() {
                            return (None, "write failed".into());
                        }
                    }
                    None => return (None, String::new()),
                },
                msg = ws_rx.next() => {
                    let frame = match msg {
                        Some(Ok(Message::Text(text))) => Frame::text(text),
                        Some(Ok(Message::Binary(bytes))) => Frame::binary(bytes),
                        // The transport answers pings on its own.
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                        Some(Ok(Message::Close(frame))) => {
                            return match frame {
                                Some(f) => (Some(f.code.into()), f.reason.into_owned()),
                                None => (None, String::new()),
                            };
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            self.inner
                                .events
                                .emit(ClientEvent::Error(Arc::new(RpcError::Transport(err.to_string()))));
                            return (None, err.to_string());
                        }
                        None => return (None, String::new()),
                    };
                    // A disconnect must cut a stalled handler, so dispatch
                    // races the cancellation token.
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return (None, String::new());
                        }
                        _ = self.inner.engine.handle(self, frame) => {}
                    }
                }
            }
        }
    }

    /// Matches a correlated response to a pending call. String ids are
    /// reserved for other uses and never match.
    fn correlate(&self, envelope: Envelope) {
        let Some(id) = envelope.id().and_then(Id::as_u64) else {
            self.inner.events.emit(ClientEvent::UnknownResponse(envelope));
            return;
        };
        let outcome = match &envelope {
            Envelope::Success { result, .. } => Ok(result.clone()),
            Envelope::Failure { error, .. } => Err(error.clone()),
            _ => return,
        };
        if !self.inner.pending.resolve(id, outcome) {
            self.inner.events.emit(ClientEvent::UnknownResponse(envelope));
        }
    }
}

#[async_trait]
impl Peer for Client {
    async fn send_frame(&self, frame: Frame) {
        if !self.send_or_buffer(frame) {
            tracing::debug!("engine reply dropped: not connected");
        }
    }

    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Response(_) => {}
            EngineEvent::MethodResponse(envelope) => self.correlate(envelope),
            EngineEvent::ErrorResponse(envelope) => {
                self.inner.events.emit(ClientEvent::ErrorResponse(envelope));
            }
            EngineEvent::NotificationError(error) => {
                self.inner.events.emit(ClientEvent::NotificationError(error));
            }
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

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn manual(cfg: ClientConfig) -> Client {
        Client::new(
            "ws://127.0.0.1:1",
            ClientConfig {
                auto_connect: false,
                ..cfg
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn starts_idle_without_auto_connect() {
        let client = manual(ClientConfig::default());
        assert_eq!(client.state(), ConnState::Idle);
    }

    #[tokio::test]
    async fn call_while_disconnected_without_buffer_rejects() {
        let client = manual(ClientConfig::default());
        let err = client.call("anything", None).await.unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn notify_while_disconnected_buffers_up_to_capacity() {
        let client = manual(ClientConfig {
            buffer_capacity: Some(2),
            ..ClientConfig::default()
        });
        client.notify("a", None).await.unwrap();
        client.notify("b", None).await.unwrap();
        let err = client.notify("c", None).await.unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_terminal() {
        let client = manual(ClientConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnState::Closed);
        client.connect();
        assert_eq!(client.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn unknown_response_ids_do_not_panic() {
        let client = manual(ClientConfig::default());
        let mut events = client.subscribe();
        client.correlate(Envelope::success(Id::Num(99), serde_json::json!(1)));
        client.correlate(Envelope::success(Id::Str("s1".into()), serde_json::json!(1)));
        for _ in 0..2 {
            let event = events.recv().await.unwrap();
            assert!(matches!(event, ClientEvent::UnknownResponse(_)));
        }
    }
}
