//! Shared error types across wsrpc crates.
//!
//! Two taxonomies, kept apart on purpose:
//! - [`ErrorObject`] is the wire-visible JSON-RPC error; only the engine
//!   produces it.
//! - [`RpcError`] is the in-process endpoint error (transport failures,
//!   timeouts, bad config), never encoded onto the wire.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The fixed JSON-RPC 2.0 error catalogue (stable wire API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed JSON frame.
    ParseError,
    /// Wrong envelope shape, bad `method`/`params` type, bad version, empty batch.
    InvalidRequest,
    /// Unknown method name.
    MethodNotFound,
    /// Handler-raised parameter error.
    InvalidParams,
    /// Reserved.
    InternalError,
    /// Handler raised a non-RPC error.
    ServerError,
}

impl ErrorCode {
    /// Numeric code on the wire.
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError => -32000,
        }
    }

    /// Built-in message used when no override is supplied.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError => "Server error",
        }
    }
}

/// Wire-visible JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object; `message` falls back to the catalogue default,
    /// `data` is attached only when supplied.
    pub fn new(code: ErrorCode, message: Option<&str>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or(code.default_message()).to_owned(),
            data,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, None, None)
    }

    /// Default message for `code`, detail string attached as `data`.
    pub fn with_details(code: ErrorCode, details: &str) -> Self {
        Self::new(code, None, Some(Value::String(details.to_owned())))
    }

    pub fn parse_error(details: &str) -> Self {
        Self::with_details(ErrorCode::ParseError, details)
    }

    pub fn invalid_request() -> Self {
        Self::from_code(ErrorCode::InvalidRequest)
    }

    pub fn method_not_found() -> Self {
        Self::from_code(ErrorCode::MethodNotFound)
    }

    /// ServerError carrying the handler's error kind as `message` and the
    /// detail as `data`.
    pub fn server_error(kind: &str, detail: &str) -> Self {
        Self::new(
            ErrorCode::ServerError,
            Some(kind),
            Some(Value::String(detail.to_owned())),
        )
    }

    /// True iff `v` already has the `{code, message, data?}` shape, so a
    /// handler-thrown value can be forwarded as-is.
    pub fn is_wellformed(v: &Value) -> bool {
        let Some(obj) = v.as_object() else {
            return false;
        };
        obj.get("code").is_some_and(Value::is_i64) && obj.get("message").is_some_and(Value::is_string)
    }

    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code == code.code()
    }
}

/// Error returned by method handlers.
///
/// `Rpc` forwards an already-shaped JSON-RPC error object untouched; anything
/// else becomes a ServerError response with `message` = kind, `data` = detail.
#[derive(Debug, Clone)]
pub enum HandlerError {
    Rpc(ErrorObject),
    Failed { kind: String, detail: String },
}

impl HandlerError {
    pub fn failed(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        HandlerError::Failed {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

impl From<ErrorObject> for HandlerError {
    fn from(obj: ErrorObject) -> Self {
        HandlerError::Rpc(obj)
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        HandlerError::failed("Error", err.to_string())
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Endpoint-internal error. Surfaced via events or rejected futures, never
/// encoded onto the wire.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("method call timeout")]
    CallTimeout,
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),
    #[error("already open")]
    AlreadyOpen,
    #[error("bad config: {0}")]
    Config(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Clone-able wrapper used inside event enums.
pub type SharedError = Arc<RpcError>;
