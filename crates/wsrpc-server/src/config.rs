//! Server config loader (strict parsing).

use std::fs;

use serde::Deserialize;

use wsrpc_core::{Result, RpcError, VersionCheck};

/// Server options. Unknown fields are rejected to keep the contract strict
/// and predictable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Heartbeat period; one ping per session per tick.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Grace window after a ping before a silent session is terminated.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// How strictly the `jsonrpc` member is checked on inbound envelopes.
    #[serde(default)]
    pub version_check: VersionCheck,

    /// Per-session outbound queue depth.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            version_check: VersionCheck::default(),
            send_queue: default_send_queue(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(RpcError::Config(
                "listen must be a valid socket address".into(),
            ));
        }
        if self.ping_interval_ms == 0 {
            return Err(RpcError::Config("ping_interval_ms must be non-zero".into()));
        }
        if self.ping_timeout_ms >= self.ping_interval_ms {
            return Err(RpcError::Config(
                "ping_timeout_ms must be smaller than ping_interval_ms".into(),
            ));
        }
        if self.send_queue == 0 {
            return Err(RpcError::Config("send_queue must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_ping_interval_ms() -> u64 {
    25_000
}
fn default_ping_timeout_ms() -> u64 {
    5_000
}
fn default_send_queue() -> usize {
    1024
}

pub fn load_from_file(path: &str) -> Result<ServerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| RpcError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ServerConfig> {
    let cfg: ServerConfig =
        serde_yaml::from_str(s).map_err(|e| RpcError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
