//! JSON-RPC 2.0 envelope grammar.
//!
//! Classification rule: an envelope is a response iff the `id` key is present
//! AND a `result` or `error` key is present; otherwise it is a call (request
//! when `id` is present, notification when absent).

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{ErrorCode, ErrorObject};

/// Protocol version string carried in every envelope.
pub const VERSION: &str = "2.0";

/// How strictly the `jsonrpc` member is checked, uniformly for all envelopes
/// (responses included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionCheck {
    /// `jsonrpc` must be present and equal `"2.0"`.
    #[default]
    Strict,
    /// `jsonrpc` may be absent, but any other value is rejected.
    Loose,
    /// No check at all.
    Ignore,
}

/// Request/response id. `Null` means the `id` key was present with a JSON
/// null; an absent key is a notification and has no `Id` at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Num(i64),
    Str(String),
    Null,
}

impl Id {
    /// Reads an id value; `None` for types the grammar does not allow.
    pub fn from_value(v: &Value) -> Option<Id> {
        match v {
            Value::Number(n) => n.as_i64().map(Id::Num),
            Value::String(s) => Some(Id::Str(s.clone())),
            Value::Null => Some(Id::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Id::Num(n) => json!(n),
            Id::Str(s) => json!(s),
            Id::Null => Value::Null,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Num(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }
}

/// A single JSON-RPC object on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Success {
        id: Id,
        result: Value,
    },
    Failure {
        id: Id,
        error: ErrorObject,
    },
}

impl Envelope {
    pub fn request(id: Id, method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn success(id: Id, result: Value) -> Self {
        Envelope::Success { id, result }
    }

    pub fn failure(id: Id, error: ErrorObject) -> Self {
        Envelope::Failure { id, error }
    }

    /// The envelope's id, if the `id` key is present on the wire.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Envelope::Request { id, .. } | Envelope::Success { id, .. } | Envelope::Failure { id, .. } => Some(id),
            Envelope::Notification { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match self {
            Envelope::Failure { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Serializes back to the wire shape. Absent members (`params`, a
    /// notification's `id`, an error's `data`) are omitted, not null.
    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Request { id, method, params } => {
                let mut obj = Map::new();
                obj.insert("jsonrpc".into(), json!(VERSION));
                obj.insert("method".into(), json!(method));
                if let Some(p) = params {
                    obj.insert("params".into(), p.clone());
                }
                obj.insert("id".into(), id.to_value());
                Value::Object(obj)
            }
            Envelope::Notification { method, params } => {
                let mut obj = Map::new();
                obj.insert("jsonrpc".into(), json!(VERSION));
                obj.insert("method".into(), json!(method));
                if let Some(p) = params {
                    obj.insert("params".into(), p.clone());
                }
                Value::Object(obj)
            }
            Envelope::Success { id, result } => json!({
                "jsonrpc": VERSION,
                "result": result,
                "id": id.to_value(),
            }),
            Envelope::Failure { id, error } => json!({
                "jsonrpc": VERSION,
                "error": error,
                "id": id.to_value(),
            }),
        }
    }

    /// Validates and classifies one envelope. The returned error object is
    /// what the engine replies with (the reply id is read off the raw value
    /// separately, since a malformed item may not have a usable one).
    pub fn from_value(v: &Value, check: VersionCheck) -> Result<Envelope, ErrorObject> {
        let Some(obj) = v.as_object() else {
            return Err(ErrorObject::invalid_request());
        };

        match check {
            VersionCheck::Strict => {
                if obj.get("jsonrpc").and_then(Value::as_str) != Some(VERSION) {
                    return Err(ErrorObject::with_details(
                        ErrorCode::InvalidRequest,
                        "Invalid JSON-RPC Version",
                    ));
                }
            }
            VersionCheck::Loose => {
                if let Some(ver) = obj.get("jsonrpc") {
                    if ver.as_str() != Some(VERSION) {
                        return Err(ErrorObject::with_details(
                            ErrorCode::InvalidRequest,
                            "Invalid JSON-RPC Version",
                        ));
                    }
                }
            }
            VersionCheck::Ignore => {}
        }

        let id = match obj.get("id") {
            Some(raw) => match Id::from_value(raw) {
                Some(id) => Some(id),
                None => return Err(ErrorObject::invalid_request()),
            },
            None => None,
        };

        // Response: id key present plus a result or error key.
        if let Some(id) = id.clone() {
            if obj.contains_key("result") || obj.contains_key("error") {
                if let Some(raw_err) = obj.get("error") {
                    let error: ErrorObject = serde_json::from_value(raw_err.clone())
                        .map_err(|_| ErrorObject::invalid_request())?;
                    return Ok(Envelope::Failure { id, error });
                }
                let result = obj.get("result").cloned().unwrap_or(Value::Null);
                return Ok(Envelope::Success { id, result });
            }
        }

        // Call: method checks, then params type check.
        let method = match obj.get("method") {
            None => {
                return Err(ErrorObject::with_details(
                    ErrorCode::MethodNotFound,
                    "Method not specified",
                ))
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ErrorObject::with_details(
                    ErrorCode::MethodNotFound,
                    "Method not specified",
                ))
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(ErrorObject::with_details(
                    ErrorCode::InvalidRequest,
                    "Invalid type of method name",
                ))
            }
        };

        // Object and array params are both accepted; null counts as absent.
        let params = match obj.get("params") {
            None | Some(Value::Null) => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
            Some(_) => return Err(ErrorObject::invalid_request()),
        };

        Ok(match id {
            Some(id) => Envelope::Request { id, method, params },
            None => Envelope::Notification { method, params },
        })
    }
}
