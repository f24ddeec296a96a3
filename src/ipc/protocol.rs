use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request message: an `op` plus op-specific fields. Unknown fields are
/// tolerated and ignored; a missing `op` deserializes to the empty string and
/// is rejected by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub op: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            fields: Map::new(),
        }
    }

    /// Build a request from an op and a JSON object of fields. Non-object
    /// values are ignored.
    pub fn with_fields(op: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            op: op.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Error taxonomy shared between server and client. `NotRunning` and
/// `Timeout` are synthesized client-side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArg,
    InvalidOp,
    NotFound,
    ActionFailed,
    NotRunning,
    Timeout,
}

/// Response envelope: exactly one per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        }
    }

    /// A failure without a taxonomy code (transport-level, client-side).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }
}
