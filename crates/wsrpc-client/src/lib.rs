//! wsrpc client library.
//!
//! One outbound connection with a reconnection state machine, exponential
//! backoff, an optional bounded outbound buffer, and per-call timeouts.
//! Inbound frames go through the shared `wsrpc-core` engine, so the client
//! can register methods and receive calls exactly like a server session.

pub mod backoff;
pub mod client;
pub mod config;
pub mod pending;

pub use backoff::Backoff;
pub use client::{Client, ClientEvent, ConnState};
pub use config::ClientConfig;
