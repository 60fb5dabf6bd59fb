//! Key and type validation for Switchboard JSON5 configuration.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Expected JSON type of a leaf config field.
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    /// String, or null for optional fields.
    OptionalString,
    String,
    Bool,
    /// Non-negative integer.
    Unsigned,
    /// Signed integer.
    Integer,
}

const BACKEND_FIELDS: &[(&str, FieldKind)] = &[
    ("base_url", FieldKind::OptionalString),
    ("api_key", FieldKind::OptionalString),
    ("api_key_env", FieldKind::String),
    ("history_table", FieldKind::String),
    ("clients_table", FieldKind::String),
    ("conversation_column", FieldKind::String),
    ("request_timeout_ms", FieldKind::Unsigned),
];

const MESSAGING_FIELDS: &[(&str, FieldKind)] = &[
    ("webhook_url", FieldKind::OptionalString),
    ("request_timeout_ms", FieldKind::Unsigned),
];

const SYNC_FIELDS: &[(&str, FieldKind)] = &[
    ("refresh_interval_ms", FieldKind::Unsigned),
    ("feed_poll_interval_ms", FieldKind::Unsigned),
    ("event_buffer", FieldKind::Unsigned),
    ("reconcile_local_echo", FieldKind::Bool),
    ("snippet_max_chars", FieldKind::Unsigned),
];

const DISPLAY_FIELDS: &[(&str, FieldKind)] = &[
    ("time_format", FieldKind::String),
    ("date_format", FieldKind::String),
    ("utc_offset_minutes", FieldKind::Integer),
];

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &["$schema", "backend", "messaging", "sync", "display"],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        check_field(value, FieldKind::String, layer, "$schema")?;
    }
    for (section, fields) in [
        ("backend", BACKEND_FIELDS),
        ("messaging", MESSAGING_FIELDS),
        ("sync", SYNC_FIELDS),
        ("display", DISPLAY_FIELDS),
    ] {
        if let Some(value) = map.get(section) {
            validate_section(value, fields, layer, section)?;
        }
    }
    Ok(())
}

/// Validate a flat section of leaf fields.
fn validate_section(
    value: &Value,
    fields: &[(&str, FieldKind)],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed: Vec<&str> = fields.iter().map(|(key, _)| *key).collect();
    ensure_allowed_keys(map, &allowed, layer, path)?;
    for (key, kind) in fields {
        if let Some(value) = map.get(*key) {
            check_field(value, *kind, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

fn check_field(value: &Value, kind: FieldKind, layer: &str, path: &str) -> Result<(), ConfigError> {
    let (ok, expected) = match kind {
        FieldKind::OptionalString => (value.is_string() || value.is_null(), "expected string"),
        FieldKind::String => (value.is_string(), "expected string"),
        FieldKind::Bool => (value.is_boolean(), "expected bool"),
        FieldKind::Unsigned => (value.is_u64(), "expected non-negative integer"),
        FieldKind::Integer => (value.is_i64() || value.is_u64(), "expected integer"),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid_field(layer, path, expected))
    }
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
