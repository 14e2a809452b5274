//! Protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ProtocolError, Result};

/// Registration frame sent by the agent right after the connection opens.
///
/// Encodes as `{"type":"register","key":<key>}`. The peer uses it to learn
/// which agent is on the other end; the connection does not wait for any
/// acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "register")]
pub struct Register {
    /// Shared key of the current session
    pub key: String,
}

impl Register {
    /// Create a registration message for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Encode as a single-line JSON object.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Inbound command from the remote controller.
///
/// Only `action` and `key` are read; any other field is ignored. A missing or
/// `null` field reads as the empty string, and numeric or boolean values are
/// read as their JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Requested action (`start`, `stop`, or anything else)
    pub action: String,
    /// Shared key presented by the controller
    pub key: String,
}

impl Command {
    /// Decode a command from the text of a frame.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the text is not JSON
    /// - `NotAnObject` if the JSON is not an object
    /// - `InvalidField` if `action` or `key` is an array or object
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let Value::Object(fields) = value else {
            return Err(ProtocolError::NotAnObject { found: json_type(&value) });
        };

        Ok(Self { action: opt_string(&fields, "action")?, key: opt_string(&fields, "key")? })
    }

    /// Encode the command; used by controllers and test peers.
    pub fn encode(&self) -> Result<String> {
        let mut fields = Map::new();
        fields.insert("action".to_string(), Value::String(self.action.clone()));
        fields.insert("key".to_string(), Value::String(self.key.clone()));
        serde_json::to_string(&Value::Object(fields)).map_err(ProtocolError::Encode)
    }
}

fn opt_string(fields: &Map<String, Value>, field: &'static str) -> Result<String> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Array(_) | Value::Object(_)) => Err(ProtocolError::InvalidField { field }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outcome reported in a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Command was carried out
    Success,
    /// Command was rejected or failed
    Error,
}

/// Response sent after processing every inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome
    pub status: Status,
    /// Human-readable detail
    pub message: String,
}

impl Response {
    /// Successful outcome with `message`.
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: Status::Success, message: message.into() }
    }

    /// Failed outcome with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: Status::Error, message: message.into() }
    }

    /// Reply to a command whose key is missing or wrong.
    pub fn invalid_key() -> Self {
        Self::error("Invalid key")
    }

    /// Reply to a frame that could not be decoded.
    pub fn invalid_format() -> Self {
        Self::error("Invalid message format")
    }

    /// Reply to an authenticated command with an unrecognised action.
    pub fn unknown_action(action: &str) -> Self {
        Self::error(format!("Unknown action: {action}"))
    }

    /// Whether the status is [`Status::Success`].
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Encode as a single-line JSON object.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a response; used by controllers and test peers.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}
