//! Dot-notation patching for free-form JSON state.
//!
//! Character profiles and trackers are open-ended JSON objects; the narrative
//! model updates them with flat maps whose keys may use dot notation
//! (`"state.fatigue"` targets `state -> fatigue`). [`patch_with`] folds such
//! an update map into a base object, creating intermediate objects as needed
//! and replacing whatever leaf value was there before.

use std::collections::BTreeMap;

use serde_json::Value;

/// Free-form JSON object used for character profiles, trackers, and
/// extension data carried alongside typed fields.
pub type JsonMap = BTreeMap<String, Value>;

/// Apply a flat update map (keys may use dot notation) onto a base object.
///
/// Returns a new [`JsonMap`]; the base is not mutated. A dotted key walks
/// into nested objects, creating them when absent. If an intermediate value
/// exists but is not an object, it is replaced by one -- the model's update
/// wins over the stale shape.
pub fn patch_with(base: &JsonMap, updates: &JsonMap) -> JsonMap {
    let mut patched = base.clone();
    for (key, value) in updates {
        apply_path(&mut patched, key, value);
    }
    patched
}

/// Set a single (possibly dotted) key on the target object.
fn apply_path(target: &mut JsonMap, key: &str, value: &Value) {
    let Some((head, rest)) = key.split_once('.') else {
        target.insert(key.to_owned(), value.clone());
        return;
    };

    // Empty head segments ("", ".fatigue") degrade to a literal key rather
    // than silently dropping the update.
    if head.is_empty() {
        target.insert(key.to_owned(), value.clone());
        return;
    }

    let entry = target
        .entry(head.to_owned())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));

    if !entry.is_object() {
        *entry = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(inner) = entry {
        apply_object_path(inner, rest, value);
    }
}

/// Recursive descent over a `serde_json` object for the remaining path.
fn apply_object_path(target: &mut serde_json::Map<String, Value>, key: &str, value: &Value) {
    let Some((head, rest)) = key.split_once('.') else {
        target.insert(key.to_owned(), value.clone());
        return;
    };

    if head.is_empty() {
        target.insert(key.to_owned(), value.clone());
        return;
    }

    let entry = target
        .entry(head.to_owned())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));

    if !entry.is_object() {
        *entry = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(inner) = entry {
        apply_object_path(inner, rest, value);
    }
}
