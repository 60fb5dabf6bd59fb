//! PostgREST implementation of [`ConversationBackend`].

use crate::http::{build_client, check_status, required, transport};
use crate::polling::RecordTail;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use switchboard_config::BackendConfig;
use switchboard_core::{BackendError, ConversationBackend, InsertFilter};
use switchboard_protocol::{ClientRecord, ConversationId, RawStoredRecord, RecordId};

/// Reads the history and client tables over the PostgREST HTTP interface.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    history_table: String,
    clients_table: String,
    conversation_column: String,
}

#[derive(Deserialize)]
struct SessionRow {
    session_id: ConversationId,
}

#[derive(Deserialize)]
struct IdRow {
    id: RecordId,
}

impl RestBackend {
    /// Build from config. `backend.base_url` is required.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = required(config.base_url.as_deref(), "backend.base_url")?;
        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            info!(
                "no backend api key configured (api_key_env={})",
                config.api_key_env
            );
        }
        Ok(Self {
            client: build_client(config.request_timeout())?,
            base_url,
            api_key,
            history_table: config.history_table.clone(),
            clients_table: config.clients_table.clone(),
            conversation_column: config.conversation_column.clone(),
        })
    }

    fn record_columns(&self) -> String {
        format!("id,session_id:{},message,data", self.conversation_column)
    }

    fn conversation_eq(&self, conversation_id: &str) -> (String, String) {
        (
            self.conversation_column.clone(),
            format!("eq.{conversation_id}"),
        )
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>, BackendError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        debug!("backend select (table={}, params={})", table, query.len());
        let mut request = self.client.get(&url).query(query);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key).bearer_auth(api_key);
        }
        let response = check_status(request.send().await.map_err(transport)?).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))
    }
}

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// PostgREST `in.(...)` list with quoted members.
fn in_list(ids: &[ConversationId]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl ConversationBackend for RestBackend {
    async fn list_message_records(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<RawStoredRecord>, BackendError> {
        let query = [
            param("select", self.record_columns()),
            self.conversation_eq(conversation_id),
            param("order", "id.asc"),
        ];
        self.select(&self.history_table, &query).await
    }

    async fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, BackendError> {
        let query = [
            param("select", format!("session_id:{}", self.conversation_column)),
            param("order", "id.desc"),
        ];
        let rows: Vec<SessionRow> = self.select(&self.history_table, &query).await?;
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .map(|row| row.session_id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn list_clients_by_ids(
        &self,
        ids: &[ConversationId],
    ) -> Result<Vec<ClientRecord>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = [param("select", "*"), param("session_id", in_list(ids))];
        self.select(&self.clients_table, &query).await
    }

    async fn latest_message_record(
        &self,
        conversation_id: &str,
    ) -> Result<Option<RawStoredRecord>, BackendError> {
        let query = [
            param("select", self.record_columns()),
            self.conversation_eq(conversation_id),
            param("order", "id.desc"),
            param("limit", "1"),
        ];
        let rows: Vec<RawStoredRecord> = self.select(&self.history_table, &query).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RecordTail for RestBackend {
    async fn latest_record_id(&self) -> Result<Option<RecordId>, BackendError> {
        let query = [
            param("select", "id"),
            param("order", "id.desc"),
            param("limit", "1"),
        ];
        let rows: Vec<IdRow> = self.select(&self.history_table, &query).await?;
        Ok(rows.first().map(|row| row.id))
    }

    async fn records_after(
        &self,
        after: RecordId,
        filter: &InsertFilter,
    ) -> Result<Vec<RawStoredRecord>, BackendError> {
        let mut query = vec![
            param("select", self.record_columns()),
            param("id", format!("gt.{after}")),
            param("order", "id.asc"),
        ];
        if let InsertFilter::Conversation(conversation_id) = filter {
            query.push(self.conversation_eq(conversation_id));
        }
        self.select(&self.history_table, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::{RestBackend, in_list};
    use pretty_assertions::assert_eq;
    use switchboard_config::BackendConfig;
    use switchboard_core::BackendError;

    #[test]
    fn in_list_quotes_and_escapes() {
        let ids = vec!["5511".to_string(), "a\"b".to_string()];
        assert_eq!(in_list(&ids), r#"in.("5511","a\"b")"#);
    }

    #[test]
    fn requires_base_url() {
        let err = RestBackend::new(&BackendConfig::default()).unwrap_err();
        assert_eq!(err, BackendError::NotConfigured("backend.base_url".to_string()));
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let config = BackendConfig {
            base_url: Some("https://project.example.test/".to_string()),
            ..BackendConfig::default()
        };
        let backend = RestBackend::new(&config).expect("backend");
        assert_eq!(backend.base_url, "https://project.example.test");
        assert_eq!(backend.record_columns(), "id,session_id:session_id,message,data");
    }
}
