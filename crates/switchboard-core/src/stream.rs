//! Message list of the currently open conversation.
//!
//! The stream is a state machine driven by the sync actor: `open` hands out a
//! ticket, the bulk fetch result comes back with that ticket, and only the
//! newest ticket is honored. Live records are appended in arrival order and
//! deduplicated by backend sequence id.

use crate::error::BackendError;
use crate::normalizer::normalize;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use switchboard_protocol::{CanonicalMessage, ConversationId, RawStoredRecord, RecordId, Role};

/// Relevance token for one `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTicket {
    pub conversation_id: ConversationId,
    pub generation: u64,
}

/// Load state of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum StreamState {
    /// No conversation open.
    #[default]
    Idle,
    /// Bulk fetch outstanding.
    Loading,
    /// History loaded; live records are appended.
    Ready,
    /// Bulk fetch failed; the list stays empty until reopened.
    Failed(String),
}

/// What happened to a bulk fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The result replaced the stream.
    Applied { messages: usize },
    /// A newer `open` superseded this one; the result was dropped.
    Stale,
    /// The fetch failed; the stream was cleared.
    Failed,
}

/// Canonical message list for one open conversation.
#[derive(Debug)]
pub struct MessageStream {
    conversation_id: Option<ConversationId>,
    generation: u64,
    state: StreamState,
    messages: Vec<CanonicalMessage>,
    seen_records: HashSet<RecordId>,
    /// Live records that arrived while the bulk fetch was outstanding.
    pending_live: Vec<RawStoredRecord>,
    reconcile_local_echo: bool,
}

impl MessageStream {
    pub fn new(reconcile_local_echo: bool) -> Self {
        Self {
            conversation_id: None,
            generation: 0,
            state: StreamState::Idle,
            messages: Vec::new(),
            seen_records: HashSet::new(),
            pending_live: Vec::new(),
            reconcile_local_echo,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn messages(&self) -> &[CanonicalMessage] {
        &self.messages
    }

    /// Whether `ticket` belongs to the most recent `open`.
    pub fn is_current(&self, ticket: &OpenTicket) -> bool {
        ticket.generation == self.generation
            && self.conversation_id.as_deref() == Some(ticket.conversation_id.as_str())
    }

    /// Start showing a conversation. Previous stream state is discarded.
    ///
    /// The caller issues the bulk fetch and reports back through
    /// [`MessageStream::complete_open`] with the returned ticket.
    pub fn open(&mut self, conversation_id: impl Into<ConversationId>) -> OpenTicket {
        let conversation_id = conversation_id.into();
        self.generation += 1;
        info!(
            "opening conversation stream (conversation_id={}, generation={})",
            conversation_id, self.generation
        );
        self.conversation_id = Some(conversation_id.clone());
        self.state = StreamState::Loading;
        self.messages.clear();
        self.seen_records.clear();
        self.pending_live.clear();
        OpenTicket {
            conversation_id,
            generation: self.generation,
        }
    }

    /// Apply the bulk fetch result for `ticket`.
    pub fn complete_open(
        &mut self,
        ticket: &OpenTicket,
        result: Result<Vec<RawStoredRecord>, BackendError>,
        now: DateTime<Utc>,
    ) -> LoadOutcome {
        if !self.is_current(ticket) {
            debug!(
                "dropping stale history fetch (conversation_id={}, generation={}, current={})",
                ticket.conversation_id, ticket.generation, self.generation
            );
            return LoadOutcome::Stale;
        }

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    "history fetch failed (conversation_id={}, error={})",
                    ticket.conversation_id, err
                );
                self.messages.clear();
                self.seen_records.clear();
                self.pending_live.clear();
                self.state = StreamState::Failed(err.to_string());
                return LoadOutcome::Failed;
            }
        };

        // Echoes sent while loading follow the fetched history unless it holds their stored copy.
        let echoes: Vec<CanonicalMessage> = self
            .messages
            .drain(..)
            .filter(CanonicalMessage::is_local_echo)
            .collect();
        self.seen_records.clear();
        for record in &records {
            if self.seen_records.insert(record.id) {
                self.messages.extend(normalize(record, now));
            }
        }
        let echoes = if self.reconcile_local_echo {
            self.drop_fetched_echoes(echoes)
        } else {
            echoes
        };
        self.messages.extend(echoes);
        self.state = StreamState::Ready;

        let pending = std::mem::take(&mut self.pending_live);
        for record in &pending {
            self.ingest(record, now);
        }
        info!(
            "conversation stream loaded (conversation_id={}, records={}, buffered_live={}, messages={})",
            ticket.conversation_id,
            records.len(),
            pending.len(),
            self.messages.len()
        );
        LoadOutcome::Applied {
            messages: self.messages.len(),
        }
    }

    /// Append a live record if it belongs to the open conversation.
    ///
    /// Returns the number of entries added or reconciled.
    pub fn on_live_record(&mut self, record: &RawStoredRecord, now: DateTime<Utc>) -> usize {
        if self.conversation_id.as_deref() != Some(record.session_id.as_str()) {
            return 0;
        }
        match self.state {
            StreamState::Loading => {
                debug!(
                    "buffering live record during load (conversation_id={}, record_id={})",
                    record.session_id, record.id
                );
                self.pending_live.push(record.clone());
                0
            }
            StreamState::Ready => self.ingest(record, now),
            StreamState::Idle | StreamState::Failed(_) => 0,
        }
    }

    /// Optimistically show a message the operator just sent.
    ///
    /// Returns `false` when no conversation is open.
    pub fn append_local(&mut self, message: CanonicalMessage) -> bool {
        if self.conversation_id.is_none() || matches!(self.state, StreamState::Failed(_)) {
            return false;
        }
        debug!(
            "appending local echo (conversation_id={}, content_len={})",
            self.conversation_id.as_deref().unwrap_or_default(),
            message.content.len()
        );
        self.messages.push(message);
        true
    }

    /// Discard the stream.
    pub fn close(&mut self) {
        if let Some(conversation_id) = self.conversation_id.take() {
            info!("closing conversation stream (conversation_id={conversation_id})");
        }
        self.generation += 1;
        self.state = StreamState::Idle;
        self.messages.clear();
        self.seen_records.clear();
        self.pending_live.clear();
    }

    fn ingest(&mut self, record: &RawStoredRecord, now: DateTime<Utc>) -> usize {
        if !self.seen_records.insert(record.id) {
            debug!(
                "ignoring duplicate record (conversation_id={}, record_id={})",
                record.session_id, record.id
            );
            return 0;
        }
        let mut touched = 0;
        for message in normalize(record, now) {
            if self.reconcile_local_echo && self.replace_matching_echo(&message) {
                touched += 1;
                continue;
            }
            self.messages.push(message);
            touched += 1;
        }
        touched
    }

    /// Remove echoes whose stored copy is already in the fetched history.
    ///
    /// Each fetched assistant message accounts for at most one echo.
    fn drop_fetched_echoes(&self, echoes: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
        let mut claimed = vec![false; self.messages.len()];
        echoes
            .into_iter()
            .filter(|echo| {
                let content = echo.content.trim();
                let found = self
                    .messages
                    .iter()
                    .enumerate()
                    .find(|(pos, message)| {
                        !claimed[*pos]
                            && message.role == Role::Assistant
                            && message.content.trim() == content
                    })
                    .map(|(pos, _)| pos);
                match found {
                    Some(pos) => {
                        claimed[pos] = true;
                        debug!(
                            "local echo already in history (record_id={:?})",
                            self.messages[pos].record_id()
                        );
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    /// Swap the oldest pending echo with the same text for its stored copy.
    fn replace_matching_echo(&mut self, stored: &CanonicalMessage) -> bool {
        if stored.role != Role::Assistant {
            return false;
        }
        let content = stored.content.trim();
        let Some(slot) = self
            .messages
            .iter_mut()
            .find(|message| message.is_local_echo() && message.content.trim() == content)
        else {
            return false;
        };
        debug!(
            "reconciled local echo with stored record (record_id={:?})",
            stored.record_id()
        );
        *slot = stored.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadOutcome, MessageStream, StreamState};
    use crate::error::BackendError;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use switchboard_protocol::{CanonicalMessage, RawStoredRecord, Role};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 5, 15, 0, 0).unwrap()
    }

    fn human(id: i64, session: &str, text: &str) -> RawStoredRecord {
        RawStoredRecord {
            id,
            session_id: session.to_string(),
            message: json!({"type": "human", "content": text}),
            data: None,
        }
    }

    fn ai(id: i64, session: &str, text: &str) -> RawStoredRecord {
        RawStoredRecord {
            id,
            session_id: session.to_string(),
            message: json!({"type": "ai", "content": text}),
            data: None,
        }
    }

    fn contents(stream: &MessageStream) -> Vec<&str> {
        stream
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect()
    }

    #[test]
    fn open_then_load_replaces_stream() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        assert_eq!(stream.state(), &StreamState::Loading);
        let outcome = stream.complete_open(
            &ticket,
            Ok(vec![human(1, "a", "oi"), ai(2, "a", "olá")]),
            now(),
        );
        assert_eq!(outcome, LoadOutcome::Applied { messages: 2 });
        assert_eq!(contents(&stream), vec!["oi", "olá"]);
        assert_eq!(stream.state(), &StreamState::Ready);
    }

    #[test]
    fn stale_result_is_discarded() {
        let mut stream = MessageStream::new(true);
        let first = stream.open("a");
        let second = stream.open("b");
        assert_eq!(
            stream.complete_open(&second, Ok(vec![human(5, "b", "from b")]), now()),
            LoadOutcome::Applied { messages: 1 }
        );
        assert_eq!(
            stream.complete_open(&first, Ok(vec![human(1, "a", "from a")]), now()),
            LoadOutcome::Stale
        );
        assert_eq!(contents(&stream), vec!["from b"]);
        assert_eq!(stream.conversation_id(), Some("b"));
    }

    #[test]
    fn reopening_same_conversation_invalidates_older_ticket() {
        let mut stream = MessageStream::new(true);
        let first = stream.open("a");
        let second = stream.open("a");
        assert!(!stream.is_current(&first));
        assert!(stream.is_current(&second));
    }

    #[test]
    fn failed_load_clears_and_does_not_accept_live_records() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        let outcome = stream.complete_open(
            &ticket,
            Err(BackendError::Transport("connection reset".to_string())),
            now(),
        );
        assert_eq!(outcome, LoadOutcome::Failed);
        assert!(stream.messages().is_empty());
        assert!(matches!(stream.state(), StreamState::Failed(message) if message.contains("connection reset")));
        assert_eq!(stream.on_live_record(&human(9, "a", "late"), now()), 0);
        assert!(stream.messages().is_empty());
    }

    #[test]
    fn live_records_append_in_arrival_order_without_sorting() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(vec![human(1, "a", "one")]), now());
        assert_eq!(stream.on_live_record(&human(3, "a", "three"), now()), 1);
        assert_eq!(stream.on_live_record(&human(2, "a", "two"), now()), 1);
        assert_eq!(contents(&stream), vec!["one", "three", "two"]);
    }

    #[test]
    fn live_records_for_other_conversations_are_ignored() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(Vec::new()), now());
        assert_eq!(stream.on_live_record(&human(1, "b", "elsewhere"), now()), 0);
        assert!(stream.messages().is_empty());
    }

    #[test]
    fn duplicate_delivery_is_shown_once() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(vec![human(1, "a", "one")]), now());
        assert_eq!(stream.on_live_record(&human(1, "a", "one"), now()), 0);
        assert_eq!(stream.on_live_record(&human(2, "a", "two"), now()), 1);
        assert_eq!(stream.on_live_record(&human(2, "a", "two"), now()), 0);
        assert_eq!(contents(&stream), vec!["one", "two"]);
    }

    #[test]
    fn live_records_during_load_are_applied_after_history() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        assert_eq!(stream.on_live_record(&human(2, "a", "two"), now()), 0);
        assert_eq!(stream.on_live_record(&human(3, "a", "three"), now()), 0);
        stream.complete_open(
            &ticket,
            Ok(vec![human(1, "a", "one"), human(2, "a", "two")]),
            now(),
        );
        assert_eq!(contents(&stream), vec!["one", "two", "three"]);
    }

    #[test]
    fn local_echo_is_replaced_by_backend_copy() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(vec![human(1, "a", "tem horário?")]), now());
        assert!(stream.append_local(CanonicalMessage::local_echo("Temos às 15h", now())));
        assert!(stream.messages()[1].is_local_echo());

        assert_eq!(stream.on_live_record(&ai(2, "a", "Temos às 15h"), now()), 1);
        assert_eq!(contents(&stream), vec!["tem horário?", "Temos às 15h"]);
        assert_eq!(stream.messages()[1].record_id(), Some(2));
        assert_eq!(stream.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn echo_reconciliation_can_be_disabled() {
        let mut stream = MessageStream::new(false);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(Vec::new()), now());
        stream.append_local(CanonicalMessage::local_echo("ok", now()));
        stream.on_live_record(&ai(2, "a", "ok"), now());
        assert_eq!(contents(&stream), vec!["ok", "ok"]);
    }

    #[test]
    fn customer_message_never_reconciles_an_echo() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.complete_open(&ticket, Ok(Vec::new()), now());
        stream.append_local(CanonicalMessage::local_echo("ok", now()));
        stream.on_live_record(&human(2, "a", "ok"), now());
        assert_eq!(stream.messages().len(), 2);
        assert!(stream.messages()[0].is_local_echo());
    }

    #[test]
    fn append_local_requires_open_conversation() {
        let mut stream = MessageStream::new(true);
        assert!(!stream.append_local(CanonicalMessage::local_echo("hi", now())));
        let ticket = stream.open("a");
        assert!(stream.append_local(CanonicalMessage::local_echo("while loading", now())));
        stream.complete_open(&ticket, Ok(vec![human(1, "a", "history")]), now());
        assert_eq!(contents(&stream), vec!["history", "while loading"]);
    }

    #[test]
    fn echo_sent_while_loading_is_dropped_when_history_has_it() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        assert!(stream.append_local(CanonicalMessage::local_echo("Temos às 15h", now())));
        assert!(stream.append_local(CanonicalMessage::local_echo("Até logo", now())));
        stream.complete_open(
            &ticket,
            Ok(vec![human(6, "a", "tem horário?"), ai(7, "a", "Temos às 15h")]),
            now(),
        );
        assert_eq!(
            contents(&stream),
            vec!["tem horário?", "Temos às 15h", "Até logo"]
        );
        assert_eq!(stream.messages()[1].record_id(), Some(7));
        assert!(stream.messages()[2].is_local_echo());
    }

    #[test]
    fn one_stored_copy_reconciles_only_one_loading_echo() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.append_local(CanonicalMessage::local_echo("ok", now()));
        stream.append_local(CanonicalMessage::local_echo("ok", now()));
        stream.complete_open(&ticket, Ok(vec![ai(3, "a", "ok")]), now());
        assert_eq!(contents(&stream), vec!["ok", "ok"]);
        assert!(!stream.messages()[0].is_local_echo());
        assert!(stream.messages()[1].is_local_echo());
    }

    #[test]
    fn close_discards_state_and_invalidates_tickets() {
        let mut stream = MessageStream::new(true);
        let ticket = stream.open("a");
        stream.close();
        assert_eq!(stream.state(), &StreamState::Idle);
        assert_eq!(
            stream.complete_open(&ticket, Ok(vec![human(1, "a", "late")]), now()),
            LoadOutcome::Stale
        );
        assert!(stream.messages().is_empty());
    }
}
