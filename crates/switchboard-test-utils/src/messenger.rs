use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use switchboard_core::{BackendError, Messenger};
use switchboard_protocol::ConversationId;

/// Messenger that records every send and optionally fails them.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<Mutex<Vec<(ConversationId, String)>>>,
    failure: Option<BackendError>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(error),
        }
    }

    /// Attempted sends in call order, including failed ones.
    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), BackendError> {
        self.sent
            .lock()
            .push((conversation_id.to_string(), text.to_string()));
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
