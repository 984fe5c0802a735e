//! Normalization of JSON-in-JSON payloads.
//!
//! Some peers store the reputation blobs as JSON text and gossip them as
//! strings. Decoding those strings before hashing or comparing makes
//! `{"a":1}` and `"{\"a\": 1}"` the same record.

use serde_json::Value;

/// Replace every string that holds a JSON object or array with the decoded
/// value, recursively. Other strings are left as they are.
pub fn decode_nested_json(value: Value) -> Value {
    match value {
        Value::String(s) => match parse_embedded(&s) {
            Some(inner) => decode_nested_json(inner),
            None => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(decode_nested_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, decode_nested_json(v)))
                .collect(),
        ),
        other => other,
    }
}

fn parse_embedded(s: &str) -> Option<Value> {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(s)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}
