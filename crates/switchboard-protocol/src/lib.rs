//! Wire and data model types shared by the Switchboard crates.

mod conversation;

pub use conversation::{ClientRecord, ConversationSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable conversation (session) identifier.
pub type ConversationId = String;
/// Backend sequence id of a stored history row.
pub type RecordId = i64;

/// One row of message history as stored by the hosted backend.
///
/// The `message` payload is opaque: it may be a JSON-encoded string, a plain
/// object, or an object wrapping a nested list of sub-messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawStoredRecord {
    /// Sequence id, ascending in insertion order.
    pub id: RecordId,
    /// Conversation the row belongs to.
    pub session_id: ConversationId,
    /// Opaque message payload.
    #[serde(default)]
    pub message: Value,
    /// Timestamp as written by the producer, when populated.
    #[serde(default)]
    pub data: Option<String>,
}

/// Speaker of a canonical message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The customer.
    User,
    /// The business side or its bot.
    Assistant,
}

impl Role {
    /// Map a stored turn type to a role. Only `human` is the customer.
    pub fn from_turn_type(turn_type: &str) -> Self {
        if turn_type == "human" {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

/// Best-effort delivery hint shown next to a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// Where a canonical message came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MessageOrigin {
    /// Derived from a stored backend record.
    Stored { record_id: RecordId },
    /// Optimistic echo of an operator send, not yet seen from the backend.
    LocalEcho { provisional_id: Uuid },
}

/// Normalized, UI-ready representation of one chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalMessage {
    /// Message text, never empty.
    pub content: String,
    /// Speaker role.
    pub role: Role,
    /// When the message happened (or was observed, if the source had no time).
    pub timestamp: DateTime<Utc>,
    /// Optional delivery hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// Provenance used for deduplication.
    pub origin: MessageOrigin,
}

impl CanonicalMessage {
    /// Build an optimistic echo for text the operator just sent.
    pub fn local_echo(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
            timestamp,
            status: Some(MessageStatus::Sent),
            origin: MessageOrigin::LocalEcho {
                provisional_id: Uuid::new_v4(),
            },
        }
    }

    /// Backend sequence id, when the message came from a stored record.
    pub fn record_id(&self) -> Option<RecordId> {
        match self.origin {
            MessageOrigin::Stored { record_id } => Some(record_id),
            MessageOrigin::LocalEcho { .. } => None,
        }
    }

    /// Whether this message is a provisional local echo.
    pub fn is_local_echo(&self) -> bool {
        matches!(self.origin, MessageOrigin::LocalEcho { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{CanonicalMessage, MessageOrigin, MessageStatus, RawStoredRecord, Role};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn role_from_turn_type_only_maps_human_to_user() {
        assert_eq!(Role::from_turn_type("human"), Role::User);
        assert_eq!(Role::from_turn_type("ai"), Role::Assistant);
        assert_eq!(Role::from_turn_type("Human"), Role::Assistant);
    }

    #[test]
    fn raw_record_tolerates_missing_timestamp() {
        let record: RawStoredRecord = serde_json::from_value(json!({
            "id": 7,
            "session_id": "5511999990000",
            "message": {"type": "ai", "content": "hi"}
        }))
        .expect("decode");
        assert_eq!(record.data, None);
        assert_eq!(record.message["content"], "hi");
    }

    #[test]
    fn local_echo_is_sent_assistant_message() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let echo = CanonicalMessage::local_echo("on my way", at);
        assert_eq!(echo.role, Role::Assistant);
        assert_eq!(echo.status, Some(MessageStatus::Sent));
        assert!(echo.is_local_echo());
        assert_eq!(echo.record_id(), None);

        let value = serde_json::to_value(&echo).expect("encode");
        assert_eq!(value["timestamp"], "2024-01-01T10:00:00Z");
        assert_eq!(value["origin"]["kind"], "local_echo");
    }

    #[test]
    fn stored_origin_exposes_record_id() {
        let message = CanonicalMessage {
            content: "Oi".to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            status: None,
            origin: MessageOrigin::Stored { record_id: 42 },
        };
        assert_eq!(message.record_id(), Some(42));
        assert!(!message.is_local_echo());
    }
}
