//! Conversion of JSON IPC payloads into the engine's property model.

use crate::host::PropertyValue;
use serde_json::Value;

/// Maps a reply's `data` onto a property value. `null` has no value.
pub fn node_from_json(value: Value) -> Option<PropertyValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(PropertyValue::Flag(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(PropertyValue::Int64(i))
            } else {
                n.as_f64().map(PropertyValue::Double)
            }
        }
        Value::String(s) => Some(PropertyValue::String(s)),
        Value::Array(items) => Some(PropertyValue::Array(
            items.into_iter().filter_map(node_from_json).collect(),
        )),
        Value::Object(map) => Some(PropertyValue::Map(
            map.into_iter()
                .filter_map(|(k, v)| node_from_json(v).map(|v| (k, v)))
                .collect(),
        )),
    }
}
