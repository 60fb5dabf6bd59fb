//! Conversation list types.

use crate::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client row used to enrich conversation summaries for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientRecord {
    /// Conversation id this client is reachable on.
    pub session_id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pet_name: Option<String>,
    #[serde(default)]
    pub pet_species: Option<String>,
}

/// One entry of the conversation list shown to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    /// Conversation id, unique within the list.
    pub id: ConversationId,
    /// Client name, falling back to the phone or the id.
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub pet_name: Option<String>,
    pub pet_species: Option<String>,
    /// Most recent message text.
    pub last_message: String,
    /// Display form of the most recent message time.
    pub last_message_time: String,
    /// Instant of the most recent message, used for recency ordering.
    pub last_activity: Option<DateTime<Utc>>,
    /// Messages received since the operator last opened the conversation.
    pub unread_count: u32,
}

impl ConversationSummary {
    /// Build an empty summary, enriched from the client record when present.
    pub fn new(id: impl Into<ConversationId>, client: Option<&ClientRecord>) -> Self {
        let id = id.into();
        let display_name = client
            .and_then(|client| non_empty(client.name.as_deref()))
            .or_else(|| client.and_then(|client| non_empty(client.phone.as_deref())))
            .unwrap_or(id.as_str())
            .to_string();
        Self {
            display_name,
            phone: client.and_then(|client| client.phone.clone()),
            email: client.and_then(|client| client.email.clone()),
            pet_name: client.and_then(|client| client.pet_name.clone()),
            pet_species: client.and_then(|client| client.pet_species.clone()),
            last_message: String::new(),
            last_message_time: String::new(),
            last_activity: None,
            unread_count: 0,
            id,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ClientRecord, ConversationSummary};
    use pretty_assertions::assert_eq;

    #[test]
    fn display_name_prefers_client_name_then_phone_then_id() {
        let named = ClientRecord {
            session_id: "c1".to_string(),
            name: Some("Ana".to_string()),
            phone: Some("+55 11 9999".to_string()),
            ..ClientRecord::default()
        };
        assert_eq!(ConversationSummary::new("c1", Some(&named)).display_name, "Ana");

        let phone_only = ClientRecord {
            session_id: "c2".to_string(),
            name: Some("  ".to_string()),
            phone: Some("+55 11 8888".to_string()),
            ..ClientRecord::default()
        };
        let summary = ConversationSummary::new("c2", Some(&phone_only));
        assert_eq!(summary.display_name, "+55 11 8888");
        assert_eq!(summary.phone.as_deref(), Some("+55 11 8888"));

        assert_eq!(ConversationSummary::new("c3", None).display_name, "c3");
    }
}
