//! Log event type and utilities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{LogflareError, Result};

/// Key holding the human readable log line
pub const MESSAGE_KEY: &str = "message";

/// Key holding arbitrary structured data
pub const METADATA_KEY: &str = "metadata";

/// Key holding the event time in epoch milliseconds
pub const TIMESTAMP_KEY: &str = "timestamp";

/// A single log event as sent to the ingestion API
///
/// Any JSON object is a valid event. By convention it carries a `message` string and a
/// `metadata` object of arbitrary depth; no other schema is imposed. Keys keep their
/// insertion order, which the typecaster relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEvent(Map<String, Value>);

impl LogEvent {
    /// Create an event carrying only a message
    pub fn new<S: Into<String>>(message: S) -> Self {
        let mut fields = Map::new();
        fields.insert(MESSAGE_KEY.to_string(), Value::String(message.into()));
        Self(fields)
    }

    /// Set the metadata tree
    pub fn with_metadata(self, metadata: Value) -> Self {
        self.with_field(METADATA_KEY, metadata)
    }

    /// Set the event timestamp, stored as epoch milliseconds
    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        self.with_field(TIMESTAMP_KEY, Value::from(timestamp.timestamp_millis()))
    }

    /// Set an arbitrary top-level field
    pub fn with_field<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// The message, if present and a string
    pub fn message(&self) -> Option<&str> {
        self.0.get(MESSAGE_KEY).and_then(Value::as_str)
    }

    /// The metadata tree, if present
    pub fn metadata(&self) -> Option<&Value> {
        self.0.get(METADATA_KEY)
    }

    /// Look up any top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the event, returning the underlying object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Map<String, Value>> for LogEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl From<LogEvent> for Value {
    fn from(event: LogEvent) -> Self {
        Value::Object(event.0)
    }
}

impl TryFrom<Value> for LogEvent {
    type Error = LogflareError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(LogflareError::Config(format!(
                "log event must be a JSON object, got {}",
                kind_name(&other)
            ))),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
