//! Value Classifier
//!
//! Maps an arbitrary JSON payload onto one of the four typed sample columns.

use serde_json::Value;

use super::SampleValue;

/// Classify raw JSON bytes.
///
/// - number  -> [`SampleValue::Number`]
/// - boolean -> [`SampleValue::Boolean`]
/// - string  -> [`SampleValue::String`] (unquoted)
/// - object, array, null -> [`SampleValue::Object`] with the parsed document
/// - invalid JSON -> [`SampleValue::Object`] holding the original bytes as a
///   JSON string, so the `value_json` column stays valid `jsonb`
#[must_use]
pub fn classify(raw: &[u8]) -> SampleValue {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => classify_value(value),
        Err(_) => SampleValue::Object(Value::String(String::from_utf8_lossy(raw).into_owned())),
    }
}

/// Classify an already-parsed JSON value.
#[must_use]
pub fn classify_value(value: Value) -> SampleValue {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => SampleValue::Number(f),
            None => SampleValue::Object(Value::Number(n)),
        },
        Value::Bool(b) => SampleValue::Boolean(b),
        Value::String(s) => SampleValue::String(s),
        other => SampleValue::Object(other),
    }
}
