//! Collaborator traits for the hosted backend and outbound messaging.

use crate::error::BackendError;
use async_trait::async_trait;
use switchboard_protocol::{ClientRecord, ConversationId, RawStoredRecord};

#[async_trait]
/// Read access to conversation history held by the hosted backend.
pub trait ConversationBackend: Send + Sync {
    /// Full history of a conversation, ascending by sequence id.
    async fn list_message_records(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<RawStoredRecord>, BackendError>;

    /// Every conversation id, most recently active first.
    async fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, BackendError>;

    /// Client rows for display enrichment of the given ids.
    async fn list_clients_by_ids(
        &self,
        ids: &[ConversationId],
    ) -> Result<Vec<ClientRecord>, BackendError>;

    /// The most recent history row of a conversation, if any.
    async fn latest_message_record(
        &self,
        conversation_id: &str,
    ) -> Result<Option<RawStoredRecord>, BackendError>;
}

#[async_trait]
/// Outbound message delivery (automation webhook or similar).
pub trait Messenger: Send + Sync {
    /// Hand a message to the delivery pipeline. Success means accepted, not delivered.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), BackendError>;
}
