use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use switchboard_protocol::{ClientRecord, RawStoredRecord, RecordId};

/// Deterministic write time for a record id: one minute per id after 2024-01-01.
pub fn record_time(id: RecordId) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + id * 60, 0)
        .single()
        .unwrap_or_default()
}

fn stored(id: RecordId, session_id: &str, message: Value) -> RawStoredRecord {
    RawStoredRecord {
        id,
        session_id: session_id.to_string(),
        message,
        data: Some(record_time(id).to_rfc3339()),
    }
}

/// Customer turn stored as a JSON-encoded string.
pub fn human_record(id: RecordId, session_id: &str, text: &str) -> RawStoredRecord {
    let encoded = json!({"type": "human", "content": text}).to_string();
    stored(id, session_id, Value::String(encoded))
}

/// Bot or operator turn stored as a plain object.
pub fn ai_record(id: RecordId, session_id: &str, text: &str) -> RawStoredRecord {
    stored(id, session_id, json!({"type": "ai", "content": text}))
}

/// Object wrapping a sub-message list; only the last element is shown.
pub fn nested_record(id: RecordId, session_id: &str, texts: &[&str]) -> RawStoredRecord {
    let messages: Vec<Value> = texts
        .iter()
        .map(|text| json!({"type": "human", "content": text}))
        .collect();
    stored(id, session_id, json!({ "messages": messages }))
}

pub fn client(session_id: &str, name: &str) -> ClientRecord {
    ClientRecord {
        session_id: session_id.to_string(),
        name: Some(name.to_string()),
        ..ClientRecord::default()
    }
}
