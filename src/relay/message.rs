// Message types and wire payloads for the relay

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Field selecting the operation
pub const ACTION_FIELD: &str = "Action";
/// Field naming the reply destination
pub const DEST_FIELD: &str = "Dest";

/// Reason sent when nothing can be pulled
pub const NO_MESSAGES_REASON: &str = "No messages available";

/// Errors raised while decoding an inbound request
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("request is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request is not a JSON object")]
    NotAnObject,

    #[error("request is missing the '{0}' field")]
    MissingField(&'static str),

    #[error("field '{0}' has an unsupported type")]
    InvalidField(&'static str),
}

/// Reply destination, opaque to everything but the reply channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dest(String);

impl Dest {
    pub fn new(dest: impl Into<String>) -> Self {
        Self(dest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation requested by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Push,
    Pull,
    /// Pull without removing ("pull-read")
    PullRead,
    /// Anything else, kept verbatim for the error reply
    Unknown(String),
}

impl Action {
    /// Parse an action name, ignoring case
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "push" => Action::Push,
            "pull" => Action::Pull,
            "pullr" => Action::PullRead,
            _ => Action::Unknown(raw.to_string()),
        }
    }
}

/// A message as held in the store: the request fields minus routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredMessage(Map<String, Value>);

impl StoredMessage {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Look up a field's value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field value as text, the form wildcard patterns are matched against
    pub fn field_text(&self, field: &str) -> Option<String> {
        self.0.get(field).map(value_text)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serialize for storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Deserialize from storage
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl From<Map<String, Value>> for StoredMessage {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A decoded, validated inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: Action,
    pub dest: Dest,
    /// Every field except `Action` and `Dest`, in arrival order
    pub fields: Map<String, Value>,
}

impl Request {
    /// Decode a raw request body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Validate an already-parsed request
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let action = match object.get(ACTION_FIELD) {
            Some(Value::String(action)) => Action::parse(action),
            Some(_) => return Err(DecodeError::InvalidField(ACTION_FIELD)),
            None => return Err(DecodeError::MissingField(ACTION_FIELD)),
        };

        let dest = match object.get(DEST_FIELD) {
            Some(Value::String(dest)) => Dest::new(dest.clone()),
            Some(Value::Number(dest)) => Dest::new(dest.to_string()),
            Some(_) => return Err(DecodeError::InvalidField(DEST_FIELD)),
            None => return Err(DecodeError::MissingField(DEST_FIELD)),
        };

        let fields = object
            .into_iter()
            .filter(|(key, _)| key != ACTION_FIELD && key != DEST_FIELD)
            .collect();

        Ok(Self { action, dest, fields })
    }

    /// The message a push of this request stores
    pub fn into_stored(self) -> StoredMessage {
        StoredMessage(self.fields)
    }
}

/// A reply payload addressed to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub dest: Dest,
    pub payload: Value,
}

impl Reply {
    /// `{"Status": "success"}`
    pub fn success(dest: Dest) -> Self {
        Self {
            dest,
            payload: json!({ "Status": "success" }),
        }
    }

    /// `{"Status": "failed", "Reason": ...}`
    pub fn failed(dest: Dest, reason: impl Into<String>) -> Self {
        Self {
            dest,
            payload: json!({ "Status": "failed", "Reason": reason.into() }),
        }
    }

    pub fn no_messages(dest: Dest) -> Self {
        Self::failed(dest, NO_MESSAGES_REASON)
    }

    pub fn unknown_command(dest: Dest, action: &str) -> Self {
        Self::failed(dest, format!("Unknown command '{}'", action))
    }

    /// The stored message's fields, flat
    pub fn message(dest: Dest, message: StoredMessage) -> Self {
        Self {
            dest,
            payload: message.into_value(),
        }
    }

    /// Serialize the payload to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(&self.payload)?;
        bytes.push(b'\n'); // Add newline delimiter
        Ok(bytes)
    }
}

/// Render a JSON value as the text wildcard patterns see
///
/// Strings are used as-is; everything else is its compact JSON form, so
/// numbers compare by their decimal text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON truthiness: null, false, 0, "", [] and {} are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
