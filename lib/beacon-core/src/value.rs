//! Coercion of raw registry values into typed values

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// How a raw registry value is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Plain text, kept as-is
    #[default]
    Text,
    /// A JSON document
    Json,
    /// A YAML document
    Yaml,
}

/// Convert a raw value into a typed one.
///
/// Malformed JSON or YAML never produces an error: the result degrades to
/// an empty object instead.
pub fn coerce(raw: &str, kind: ValueKind) -> Value {
    match kind {
        ValueKind::Text => Value::String(raw.to_string()),
        ValueKind::Json => serde_json::from_str(raw).unwrap_or_else(|e| {
            debug!(error = %e, "Malformed JSON value, using empty object");
            empty()
        }),
        ValueKind::Yaml => serde_yaml::from_str(raw).unwrap_or_else(|e| {
            debug!(error = %e, "Malformed YAML value, using empty object");
            empty()
        }),
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}
