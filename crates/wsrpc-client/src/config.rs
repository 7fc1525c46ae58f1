//! Client config loader (strict parsing).

use std::collections::BTreeMap;
use std::fs;

use serde::Deserialize;

use wsrpc_core::{Result, RpcError, VersionCheck};

/// Client options. Unknown fields are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Start connecting from the constructor. Requires a tokio runtime.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Give up after this many consecutive failed attempts.
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,

    #[serde(default = "default_reconnection_delay_max_ms")]
    pub reconnection_delay_max_ms: u64,

    /// Fractional jitter applied symmetrically to the current delay.
    #[serde(default = "default_reconnection_jitter")]
    pub reconnection_jitter: f64,

    #[serde(default = "default_method_call_timeout_ms")]
    pub method_call_timeout_ms: u64,

    /// Extra query parameters appended to the connect URL.
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// WebSocket subprotocols offered on the handshake.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Outbound FIFO kept while not connected, flushed on the next open.
    /// `None` disables buffering: sends while disconnected fail immediately.
    #[serde(default)]
    pub buffer_capacity: Option<usize>,

    #[serde(default)]
    pub version_check: VersionCheck,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnection: true,
            auto_connect: true,
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            reconnection_delay_max_ms: default_reconnection_delay_max_ms(),
            reconnection_jitter: default_reconnection_jitter(),
            method_call_timeout_ms: default_method_call_timeout_ms(),
            query: BTreeMap::new(),
            protocols: Vec::new(),
            buffer_capacity: None,
            version_check: VersionCheck::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconnection_delay_ms == 0 {
            return Err(RpcError::Config("reconnection_delay_ms must be non-zero".into()));
        }
        if self.reconnection_delay_max_ms < self.reconnection_delay_ms {
            return Err(RpcError::Config(
                "reconnection_delay_max_ms must be at least reconnection_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnection_jitter) {
            return Err(RpcError::Config(
                "reconnection_jitter must be within 0.0..=1.0".into(),
            ));
        }
        if self.method_call_timeout_ms == 0 {
            return Err(RpcError::Config("method_call_timeout_ms must be non-zero".into()));
        }
        if self.buffer_capacity == Some(0) {
            return Err(RpcError::Config("buffer_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_reconnection_attempts() -> u32 {
    u32::MAX
}
fn default_reconnection_delay_ms() -> u64 {
    1_000
}
fn default_reconnection_delay_max_ms() -> u64 {
    5_000
}
fn default_reconnection_jitter() -> f64 {
    0.5
}
fn default_method_call_timeout_ms() -> u64 {
    20_000
}

pub fn load_from_file(path: &str) -> Result<ClientConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| RpcError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig =
        serde_yaml::from_str(s).map_err(|e| RpcError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_match_the_frozen_contract() {
        let cfg = ClientConfig::default();
        assert!(cfg.reconnection);
        assert!(cfg.auto_connect);
        assert_eq!(cfg.reconnection_attempts, u32::MAX);
        assert_eq!(cfg.reconnection_delay_ms, 1_000);
        assert_eq!(cfg.reconnection_delay_max_ms, 5_000);
        assert_eq!(cfg.reconnection_jitter, 0.5);
        assert_eq!(cfg.method_call_timeout_ms, 20_000);
        assert!(cfg.query.is_empty());
        assert!(cfg.protocols.is_empty());
        assert!(cfg.buffer_capacity.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        let cfg = ClientConfig {
            reconnection_jitter: 1.5,
            ..ClientConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(load_from_str("reconection: false # typo").is_err());
    }
}
