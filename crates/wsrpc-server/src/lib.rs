//! wsrpc server library.
//!
//! Assembles the server side of the stack:
//! - Transport: Axum-based WebSocket upgrade, one writer/reader pair per
//!   connection.
//! - Sessions: stable UUIDv4 ids, room membership, user data, pong tracking.
//! - Heartbeat: interval ping with termination of silent peers.
//! - Fan-out: broadcast / room notify / raw room send, encoded once.
//! - Dispatch: inbound frames go through the shared `wsrpc-core` engine;
//!   registered methods receive the originating [`Session`].
//!
//! Upstream errors surface as structured `RpcError` values and events
//! instead of crashing the process.

pub mod config;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use server::{Server, ServerEvent};
pub use session::{PongState, Session, SessionEvent};
