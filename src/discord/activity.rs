//! SET_ACTIVITY payloads.

use crate::presence::Presence;
use serde_json::{Map, Value, json};
use unicode_segmentation::UnicodeSegmentation;

/// Discord rejects activity strings longer than this many bytes.
pub const FIELD_LIMIT: usize = 128;

/// Longest prefix of `s` that fits in `FIELD_LIMIT` bytes without splitting a
/// grapheme cluster.
pub fn truncate_field(s: &str) -> &str {
    if s.len() <= FIELD_LIMIT {
        return s;
    }
    let mut end = 0;
    for (idx, grapheme) in s.grapheme_indices(true) {
        let next = idx + grapheme.len();
        if next > FIELD_LIMIT {
            break;
        }
        end = next;
    }
    &s[..end]
}

fn put(map: &mut Map<String, Value>, key: &str, value: &str) {
    let value = truncate_field(value);
    if !value.is_empty() {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub fn activity_json(presence: &Presence) -> Value {
    let mut activity = Map::new();
    put(&mut activity, "details", &presence.details);
    put(&mut activity, "state", &presence.state);

    let mut assets = Map::new();
    put(&mut assets, "large_image", &presence.large_image_key);
    put(&mut assets, "large_text", &presence.large_image_text);
    if let Some(key) = &presence.small_image_key {
        put(&mut assets, "small_image", key);
    }
    if let Some(text) = &presence.small_image_text {
        put(&mut assets, "small_text", text);
    }
    if !assets.is_empty() {
        activity.insert("assets".to_string(), Value::Object(assets));
    }
    activity.insert("instance".to_string(), Value::Bool(false));
    Value::Object(activity)
}

/// Command frame body. `None` clears the activity.
pub fn set_activity(pid: u32, presence: Option<&Presence>, nonce: u64) -> Value {
    json!({
        "cmd": "SET_ACTIVITY",
        "args": {
            "pid": pid,
            "activity": presence.map(activity_json),
        },
        "nonce": nonce.to_string(),
    })
}
