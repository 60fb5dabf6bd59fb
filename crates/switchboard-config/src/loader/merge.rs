//! Layer overlay for the effective config document.

use serde_json::Value;

/// Fold `layer` into `effective`.
///
/// Sections merge key by key; any other value from the later layer wins.
pub(super) fn overlay(effective: &mut Value, layer: Value) {
    let Value::Object(layer_keys) = layer else {
        *effective = layer;
        return;
    };
    let Value::Object(section) = effective else {
        *effective = Value::Object(layer_keys);
        return;
    };
    for (key, value) in layer_keys {
        match section.get_mut(&key) {
            Some(slot) => overlay(slot, value),
            None => {
                section.insert(key, value);
            }
        }
    }
}
