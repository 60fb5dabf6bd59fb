use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::{BackendError, ConversationBackend};
use switchboard_protocol::{ClientRecord, ConversationId, RawStoredRecord};
use tokio::sync::Notify;

/// One call made against [`StubBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListMessages(ConversationId),
    ListConversations,
    ListClients(Vec<ConversationId>),
    Latest(ConversationId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GateKey {
    Listing,
    History(ConversationId),
}

/// Holds the next matching call until released.
#[derive(Clone)]
pub struct Gate(Arc<Notify>);

impl Gate {
    pub fn release(&self) {
        self.0.notify_one();
    }
}

#[derive(Default)]
struct StubState {
    records: Vec<RawStoredRecord>,
    clients: Vec<ClientRecord>,
    listing_failure: Option<BackendError>,
    history_failures: HashMap<ConversationId, BackendError>,
    latest_failures: HashMap<ConversationId, BackendError>,
    gates: HashMap<GateKey, Arc<Notify>>,
    calls: Vec<BackendCall>,
}

/// In-memory history table with programmable failures and gates.
#[derive(Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<RawStoredRecord>) -> Self {
        let backend = Self::new();
        backend.state.lock().records = records;
        backend
    }

    /// Insert a history row as the backend would.
    pub fn push_record(&self, record: RawStoredRecord) {
        self.state.lock().records.push(record);
    }

    pub fn set_clients(&self, clients: Vec<ClientRecord>) {
        self.state.lock().clients = clients;
    }

    /// Make conversation listing fail until [`StubBackend::recover_listing`].
    pub fn fail_listing(&self, error: BackendError) {
        self.state.lock().listing_failure = Some(error);
    }

    pub fn recover_listing(&self) {
        self.state.lock().listing_failure = None;
    }

    pub fn fail_history_for(&self, conversation_id: &str, error: BackendError) {
        self.state
            .lock()
            .history_failures
            .insert(conversation_id.to_string(), error);
    }

    pub fn fail_latest_for(&self, conversation_id: &str, error: BackendError) {
        self.state
            .lock()
            .latest_failures
            .insert(conversation_id.to_string(), error);
    }

    /// Hold the next conversation listing until the gate is released.
    pub fn gate_listing(&self) -> Gate {
        self.gate(GateKey::Listing)
    }

    /// Hold the next history fetch for `conversation_id` until released.
    pub fn gate_history(&self, conversation_id: &str) -> Gate {
        self.gate(GateKey::History(conversation_id.to_string()))
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Number of conversation listings, i.e. started rescans.
    pub fn listing_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::ListConversations))
            .count()
    }

    fn gate(&self, key: GateKey) -> Gate {
        let notify = Arc::new(Notify::new());
        self.state.lock().gates.insert(key, notify.clone());
        Gate(notify)
    }

    fn record_call(&self, call: BackendCall) {
        self.state.lock().calls.push(call);
    }

    async fn pass_gate(&self, key: GateKey) {
        let gate = self.state.lock().gates.remove(&key);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl ConversationBackend for StubBackend {
    async fn list_message_records(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<RawStoredRecord>, BackendError> {
        self.record_call(BackendCall::ListMessages(conversation_id.to_string()));
        self.pass_gate(GateKey::History(conversation_id.to_string()))
            .await;
        let state = self.state.lock();
        if let Some(error) = state.history_failures.get(conversation_id) {
            return Err(error.clone());
        }
        let mut records: Vec<RawStoredRecord> = state
            .records
            .iter()
            .filter(|record| record.session_id == conversation_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, BackendError> {
        self.record_call(BackendCall::ListConversations);
        self.pass_gate(GateKey::Listing).await;
        let state = self.state.lock();
        if let Some(error) = &state.listing_failure {
            return Err(error.clone());
        }
        let mut latest: HashMap<&str, i64> = HashMap::new();
        for record in &state.records {
            let entry = latest.entry(record.session_id.as_str()).or_insert(record.id);
            *entry = (*entry).max(record.id);
        }
        let mut ids: Vec<(&str, i64)> = latest.into_iter().collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(ids.into_iter().map(|(id, _)| id.to_string()).collect())
    }

    async fn list_clients_by_ids(
        &self,
        ids: &[ConversationId],
    ) -> Result<Vec<ClientRecord>, BackendError> {
        self.record_call(BackendCall::ListClients(ids.to_vec()));
        let state = self.state.lock();
        Ok(state
            .clients
            .iter()
            .filter(|client| ids.contains(&client.session_id))
            .cloned()
            .collect())
    }

    async fn latest_message_record(
        &self,
        conversation_id: &str,
    ) -> Result<Option<RawStoredRecord>, BackendError> {
        self.record_call(BackendCall::Latest(conversation_id.to_string()));
        let state = self.state.lock();
        if let Some(error) = state.latest_failures.get(conversation_id) {
            return Err(error.clone());
        }
        Ok(state
            .records
            .iter()
            .filter(|record| record.session_id == conversation_id)
            .max_by_key(|record| record.id)
            .cloned())
    }
}
