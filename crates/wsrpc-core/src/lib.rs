//! wsrpc core: JSON-RPC 2.0 grammar, codec and the symmetric message engine.
//!
//! Nothing in this crate touches a socket. Both endpoints feed inbound frames
//! into [`Engine::handle`] and give it a [`Peer`] that knows how to send a
//! frame back and how to surface engine events; everything else (sessions,
//! rooms, reconnection) lives in the endpoint crates.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;

pub use codec::{Frame, Incoming};
pub use engine::{Engine, EngineEvent, Peer};
pub use error::{ErrorCode, ErrorObject, HandlerError, Result, RpcError};
pub use events::EventBus;
pub use protocol::{Envelope, Id, VersionCheck};
pub use registry::MethodRegistry;
