//! Stored history rows to canonical messages.
//!
//! The `message` payload of a history row has taken several shapes over time.
//! [`classify`] maps a payload onto a closed set of [`PayloadShape`]s in
//! precedence order; [`normalize`] turns the shape into at most one message.
//! Unrecognized shapes are not errors: they produce nothing.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use switchboard_protocol::{CanonicalMessage, MessageOrigin, RawStoredRecord, Role};

/// Key of the nested sub-message list in wrapped payloads.
const NESTED_LIST_KEY: &str = "messages";

/// Naive timestamp layouts accepted in addition to RFC 3339; read as UTC.
const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One chat turn extracted from a payload, before empty-content filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Payload shapes, listed in the order they are tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    /// JSON-encoded string holding a `{type, content}` object.
    EncodedTurn(Turn),
    /// String that is not JSON; an opaque bot utterance.
    OpaqueText(String),
    /// Object carrying `type` and `content` directly.
    Turn(Turn),
    /// Object wrapping a sub-message list; holds the mapped last element.
    Nested(Option<Turn>),
    /// Anything else.
    Unrecognized,
}

impl PayloadShape {
    /// The turn this shape yields, if any.
    pub fn into_turn(self) -> Option<Turn> {
        match self {
            PayloadShape::EncodedTurn(turn) | PayloadShape::Turn(turn) => Some(turn),
            PayloadShape::Nested(turn) => turn,
            PayloadShape::OpaqueText(content) => Some(Turn {
                role: Role::Assistant,
                content,
            }),
            PayloadShape::Unrecognized => None,
        }
    }
}

/// Classify a raw payload.
pub fn classify(payload: &Value) -> PayloadShape {
    match payload {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Err(_) => PayloadShape::OpaqueText(raw.clone()),
            Ok(Value::Object(map)) => match turn_from_object(&map) {
                Some(turn) => PayloadShape::EncodedTurn(turn),
                None => classify_object(&map),
            },
            Ok(_) => PayloadShape::Unrecognized,
        },
        Value::Object(map) => classify_object(map),
        _ => PayloadShape::Unrecognized,
    }
}

fn classify_object(map: &Map<String, Value>) -> PayloadShape {
    if let Some(turn) = turn_from_object(map) {
        return PayloadShape::Turn(turn);
    }
    match map.get(NESTED_LIST_KEY) {
        Some(Value::Array(items)) => PayloadShape::Nested(
            items
                .last()
                .and_then(Value::as_object)
                .and_then(turn_from_object),
        ),
        _ => PayloadShape::Unrecognized,
    }
}

fn turn_from_object(map: &Map<String, Value>) -> Option<Turn> {
    let turn_type = map.get("type")?.as_str()?;
    let content = map.get("content")?.as_str()?;
    Some(Turn {
        role: Role::from_turn_type(turn_type),
        content: content.to_string(),
    })
}

/// Normalize one stored row into zero or more canonical messages.
///
/// `now` stands in for the timestamp when the row carries none that parses.
pub fn normalize(record: &RawStoredRecord, now: DateTime<Utc>) -> Vec<CanonicalMessage> {
    let Some(turn) = classify(&record.message).into_turn() else {
        return Vec::new();
    };
    if turn.content.trim().is_empty() {
        return Vec::new();
    }
    let timestamp = record
        .data
        .as_deref()
        .and_then(parse_record_time)
        .unwrap_or(now);
    vec![CanonicalMessage {
        content: turn.content,
        role: turn.role,
        timestamp,
        status: None,
        origin: MessageOrigin::Stored {
            record_id: record.id,
        },
    }]
}

/// Normalize rows in order, concatenating their messages.
pub fn normalize_all(records: &[RawStoredRecord], now: DateTime<Utc>) -> Vec<CanonicalMessage> {
    records
        .iter()
        .flat_map(|record| normalize(record, now))
        .collect()
}

/// Parse a producer-written timestamp.
pub fn parse_record_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Postgres text output: "2024-01-01 10:00:00.123+00"
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_LAYOUTS.iter().find_map(|layout| {
        NaiveDateTime::parse_from_str(value, layout)
            .ok()
            .map(|naive| naive.and_utc())
    })
}
