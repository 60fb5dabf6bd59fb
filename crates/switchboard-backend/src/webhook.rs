//! Outbound messages through the automation webhook.

use crate::http::{build_client, check_status, required, transport};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use switchboard_config::MessagingConfig;
use switchboard_core::{BackendError, Messenger};

/// Posts `{ "session_id": ..., "message": ... }` to the configured webhook.
#[derive(Debug, Clone)]
pub struct WebhookMessenger {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    session_id: &'a str,
    message: &'a str,
}

impl WebhookMessenger {
    /// Build from config. `messaging.webhook_url` is required.
    pub fn new(config: &MessagingConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            url: required(config.webhook_url.as_deref(), "messaging.webhook_url")?,
        })
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), BackendError> {
        debug!(
            "posting outbound message (conversation_id={}, len={})",
            conversation_id,
            text.len()
        );
        let response = self
            .client
            .post(&self.url)
            .json(&OutboundMessage {
                session_id: conversation_id,
                message: text,
            })
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }
}
