//! Application payloads for `broadcast`/`send`
//!
//! Everything goes over the wire as text. Structured payloads are encoded
//! once, at the call boundary, as compact JSON with object keys sorted, so
//! every peer receives byte-identical text for the same value.

use serde::Serialize;
use serde_json::{Map, Value};

/// Data handed to `broadcast` or `send`
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent verbatim
    Text(String),
    /// Sent as canonical JSON
    Structured(Value),
}

impl Payload {
    /// Build a structured payload from any serializable value
    pub fn structured<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    /// Resolve to the text that goes on the wire
    pub fn encode(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Structured(value) => canonical(value).to_string(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Rebuild `value` with every object's keys in sorted order
///
/// Holds even when serde_json's `preserve_order` feature is switched on by
/// another crate in the build.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
