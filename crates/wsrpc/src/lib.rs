//! Top-level facade crate for wsrpc.
//!
//! Re-exports the core engine and both endpoints so users can depend on a
//! single crate.

pub mod core {
    pub use wsrpc_core::*;
}

pub mod server {
    pub use wsrpc_server::*;
}

pub mod client {
    pub use wsrpc_client::*;
}
