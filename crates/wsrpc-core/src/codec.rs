//! Stateless frame codec.
//!
//! Frames are either UTF-8 text or binary carrying UTF-8 JSON; the `binary`
//! bit is preserved so the reply goes out in the same mode as the request.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{ErrorCode, ErrorObject};

/// One transport frame, decoupled from any WebSocket library's message type.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub payload: Bytes,
    pub binary: bool,
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            payload: Bytes::from(s.into().into_bytes()),
            binary: false,
        }
    }

    pub fn binary(b: impl Into<Bytes>) -> Self {
        Self {
            payload: b.into(),
            binary: true,
        }
    }

    /// Payload as UTF-8, if valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Decoded inbound payload: a single envelope value or a non-empty batch.
#[derive(Debug, Clone)]
pub enum Incoming {
    Single(Value),
    Batch(Vec<Value>),
}

/// Parses a frame. Non-JSON (including invalid UTF-8) fails with ParseError;
/// an empty array fails with InvalidRequest carrying `"Empty Array"`.
pub fn decode(frame: &Frame) -> Result<Incoming, ErrorObject> {
    let text = frame
        .as_str()
        .ok_or_else(|| ErrorObject::parse_error("Invalid JSON"))?;
    let value: Value =
        serde_json::from_str(text).map_err(|_| ErrorObject::parse_error("Invalid JSON"))?;
    match value {
        Value::Array(items) if items.is_empty() => Err(ErrorObject::with_details(
            ErrorCode::InvalidRequest,
            "Empty Array",
        )),
        Value::Array(items) => Ok(Incoming::Batch(items)),
        other => Ok(Incoming::Single(other)),
    }
}

/// Serializes a value into a frame of the requested modality.
pub fn encode(value: &Value, binary: bool) -> Frame {
    let payload = Bytes::from(value.to_string().into_bytes());
    Frame { payload, binary }
}
