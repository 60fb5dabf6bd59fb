//! Sync actor and the handle the UI talks to.
//!
//! [`SyncService::start`] spawns one task that owns the conversation list, the
//! open message stream and all feed subscriptions. Every input reaches it as a
//! [`SyncEvent`] on a single queue; fetches run in spawned tasks that post
//! their results back. The UI observes [`ConsoleView`] snapshots through a
//! `watch` channel that only changes when the view actually differs.

use crate::backend::{ConversationBackend, Messenger};
use crate::dispatch::{self, ListAction, SubscriptionSet, spawn_subscription};
use crate::display::SummaryFormatter;
use crate::error::{BackendError, SyncError};
use crate::event::{Command, FeedScope, SyncEvent};
use crate::feed::{ChangeFeed, InsertFilter};
use crate::reconciler::{ConversationReconciler, IncrementalOutcome, RescanMode, collect_rescan};
use crate::scheduler::{RefreshScheduler, Visibility};
use crate::stream::{LoadOutcome, MessageStream, OpenTicket, StreamState};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchboard_config::SwitchboardConfig;
use switchboard_protocol::{CanonicalMessage, ConversationId, ConversationSummary, RawStoredRecord};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Part of the console an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    ConversationList,
    Messages,
    Send,
}

/// Error surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewError {
    pub source: ErrorSource,
    pub message: String,
}

impl ViewError {
    fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Snapshot of everything the console renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleView {
    /// Conversation list, most recent activity first.
    pub conversations: Vec<ConversationSummary>,
    /// Id of the open conversation.
    pub selected: Option<ConversationId>,
    /// Messages of the open conversation in append order.
    pub messages: Vec<CanonicalMessage>,
    pub stream_state: StreamState,
    /// True while an initial or manual rescan is outstanding.
    pub loading: bool,
    /// Last surfaced error, if not yet cleared by a later success.
    pub error: Option<ViewError>,
    pub visibility: Visibility,
}

impl ConsoleView {
    /// Summary for `conversation_id`, if listed.
    pub fn conversation(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.conversations
            .iter()
            .find(|summary| summary.id == conversation_id)
    }
}

/// Collaborators and settings for one sync service.
pub struct SyncService {
    config: SwitchboardConfig,
    backend: Arc<dyn ConversationBackend>,
    feed: Arc<dyn ChangeFeed>,
    messenger: Option<Arc<dyn Messenger>>,
}

impl SyncService {
    pub fn new(
        config: SwitchboardConfig,
        backend: Arc<dyn ConversationBackend>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            config,
            backend,
            feed,
            messenger: None,
        }
    }

    /// Enable outbound sends.
    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Spawn the sync actor. Must be called within a tokio runtime.
    pub fn start(self) -> SyncHandle {
        let sync = &self.config.sync;
        let (events_tx, events_rx) = mpsc::channel(sync.event_buffer.max(1));
        let (view_tx, view_rx) = watch::channel(ConsoleView::default());
        let (visibility_tx, _) = watch::channel(Visibility::Visible);
        let formatter = SummaryFormatter::from_config(&self.config.display, sync);
        let scheduler = RefreshScheduler::new(sync.refresh_interval());

        let actor = SyncActor {
            backend: self.backend,
            feed: self.feed,
            messenger: self.messenger,
            events: events_tx.clone(),
            view: view_tx,
            visibility: visibility_tx,
            reconciler: ConversationReconciler::new(formatter),
            stream: MessageStream::new(sync.reconcile_local_echo),
            subscriptions: SubscriptionSet::default(),
            scheduler: None,
            rescans_in_flight: 0,
            foreground_rescans: 0,
            error: None,
        };
        info!(
            "starting sync service (refresh_interval_ms={}, event_buffer={}, messaging={})",
            sync.refresh_interval_ms,
            sync.event_buffer,
            actor.messenger.is_some()
        );
        let task = tokio::spawn(actor.run(events_rx, scheduler));
        SyncHandle {
            commands: events_tx,
            view: view_rx,
            task: Some(task),
        }
    }
}

/// Client side of a running sync service.
///
/// Dropping the handle stops the service; [`SyncHandle::shutdown`] stops it
/// and waits for teardown.
pub struct SyncHandle {
    commands: mpsc::Sender<SyncEvent>,
    view: watch::Receiver<ConsoleView>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Receiver of view snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ConsoleView> {
        self.view.clone()
    }

    /// Current view snapshot.
    pub fn view(&self) -> ConsoleView {
        self.view.borrow().clone()
    }

    /// Open a conversation: load its history, follow it live and mark it read.
    pub async fn select_conversation(
        &self,
        conversation_id: impl Into<ConversationId>,
    ) -> Result<(), SyncError> {
        self.command(Command::Select(conversation_id.into())).await
    }

    pub async fn close_conversation(&self) -> Result<(), SyncError> {
        self.command(Command::Close).await
    }

    pub async fn mark_read(&self, conversation_id: impl Into<ConversationId>) -> Result<(), SyncError> {
        self.command(Command::MarkRead(conversation_id.into())).await
    }

    /// Operator-requested rescan; toggles the loading flag.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.command(Command::Refresh).await
    }

    /// Append an already-built message to the open stream.
    pub async fn send_local_echo_message(&self, message: CanonicalMessage) -> Result<(), SyncError> {
        self.command(Command::LocalEcho(message)).await
    }

    /// Send text to the open conversation and echo it on success.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SyncError> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Send {
            text: text.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| SyncError::ServiceClosed)?
    }

    /// Report host visibility; refresh ticks pause while hidden.
    pub async fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        self.command(Command::SetVisibility(Visibility::from_visible(visible)))
            .await
    }

    /// Stop the service, tearing down subscriptions and the scheduler.
    pub async fn shutdown(mut self) -> Result<(), SyncError> {
        if self.command(Command::Shutdown).await.is_err() {
            debug!("sync service already stopped");
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| SyncError::ServiceClosed)?;
        }
        Ok(())
    }

    async fn command(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(SyncEvent::Command(command))
            .await
            .map_err(|_| SyncError::ServiceClosed)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SyncActor {
    backend: Arc<dyn ConversationBackend>,
    feed: Arc<dyn ChangeFeed>,
    messenger: Option<Arc<dyn Messenger>>,
    events: mpsc::Sender<SyncEvent>,
    view: watch::Sender<ConsoleView>,
    visibility: watch::Sender<Visibility>,
    reconciler: ConversationReconciler,
    stream: MessageStream,
    subscriptions: SubscriptionSet,
    scheduler: Option<JoinHandle<()>>,
    rescans_in_flight: usize,
    foreground_rescans: usize,
    error: Option<ViewError>,
}

impl SyncActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<SyncEvent>, scheduler: RefreshScheduler) {
        self.subscriptions.set_list(spawn_subscription(
            self.feed.clone(),
            InsertFilter::AllConversations,
            FeedScope::List,
            self.events.clone(),
        ));
        self.scheduler = Some(scheduler.spawn(self.visibility.subscribe(), self.events.clone()));
        self.start_rescan(RescanMode::Initial);
        self.publish();

        while let Some(event) = inbox.recv().await {
            if !self.handle(event) {
                break;
            }
            self.publish();
        }
        self.teardown();
        info!("sync service stopped");
    }

    /// Apply one event. Returns `false` when the actor should stop.
    fn handle(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::Tick => {
                if self.rescans_in_flight > 0 {
                    debug!(
                        "skipping refresh tick (rescans_in_flight={})",
                        self.rescans_in_flight
                    );
                } else {
                    self.start_rescan(RescanMode::Background);
                }
            }
            SyncEvent::Command(command) => return self.handle_command(command),
            SyncEvent::RescanFinished { mode, result } => {
                self.rescans_in_flight = self.rescans_in_flight.saturating_sub(1);
                if mode.is_foreground() {
                    self.foreground_rescans = self.foreground_rescans.saturating_sub(1);
                }
                match result {
                    Ok(fresh) => {
                        self.reconciler.apply_rescan(fresh, mode);
                        if mode.is_foreground() {
                            self.clear_error(ErrorSource::ConversationList);
                        }
                    }
                    Err(err) if mode.is_foreground() => {
                        warn!("conversation list fetch failed (mode={:?}, error={})", mode, err);
                        self.error = Some(ViewError::new(ErrorSource::ConversationList, err.to_string()));
                    }
                    Err(err) => warn!("background rescan failed (error={err})"),
                }
            }
            SyncEvent::LatestFetched {
                conversation_id,
                trigger,
                result,
            } => self.apply_latest(conversation_id, trigger, result),
            SyncEvent::StreamLoaded { ticket, result } => {
                let failure = result.as_ref().err().map(ToString::to_string);
                match self.stream.complete_open(&ticket, result, Utc::now()) {
                    LoadOutcome::Applied { .. } => self.clear_error(ErrorSource::Messages),
                    LoadOutcome::Failed => {
                        self.error = Some(ViewError::new(
                            ErrorSource::Messages,
                            failure.unwrap_or_default(),
                        ));
                    }
                    LoadOutcome::Stale => {}
                }
            }
            SyncEvent::LiveRecord { scope, record } => self.dispatch_live(scope, record),
            SyncEvent::SubscriptionFailed { scope, error } => {
                warn!("change feed subscription failed (scope={:?}, error={})", scope, error);
            }
            SyncEvent::SendFinished {
                conversation_id,
                text,
                result,
                reply,
            } => {
                let outcome = match result {
                    Ok(()) => {
                        info!("message sent (conversation_id={conversation_id})");
                        if self.stream.conversation_id() == Some(conversation_id.as_str()) {
                            self.stream
                                .append_local(CanonicalMessage::local_echo(text, Utc::now()));
                        }
                        self.clear_error(ErrorSource::Send);
                        Ok(())
                    }
                    Err(err) => {
                        warn!("message send failed (conversation_id={conversation_id}, error={err})");
                        self.error = Some(ViewError::new(ErrorSource::Send, err.to_string()));
                        Err(SyncError::Backend(err))
                    }
                };
                let _ = reply.send(outcome);
            }
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Refresh => self.start_rescan(RescanMode::Manual),
            Command::Select(conversation_id) => self.select(conversation_id),
            Command::Close => {
                self.stream.close();
                self.subscriptions.set_stream(None);
                self.clear_error(ErrorSource::Messages);
            }
            Command::MarkRead(conversation_id) => {
                if !self.reconciler.mark_read(&conversation_id) {
                    debug!("mark read for unknown conversation (conversation_id={conversation_id})");
                }
            }
            Command::LocalEcho(message) => {
                if !self.stream.append_local(message) {
                    debug!("dropping local echo without an open conversation");
                }
            }
            Command::Send { text, reply } => self.send(text, reply),
            Command::SetVisibility(visibility) => {
                debug!("visibility changed (visibility={:?})", visibility);
                self.visibility.send_replace(visibility);
            }
            Command::Shutdown => {
                info!("sync service shutdown requested");
                return false;
            }
        }
        true
    }

    fn select(&mut self, conversation_id: ConversationId) {
        let ticket = self.stream.open(conversation_id.clone());
        self.reconciler.mark_read(&conversation_id);
        self.clear_error(ErrorSource::Messages);
        self.subscriptions.set_stream(Some(spawn_subscription(
            self.feed.clone(),
            InsertFilter::Conversation(conversation_id),
            FeedScope::Stream,
            self.events.clone(),
        )));
        self.load_history(ticket);
    }

    fn load_history(&self, ticket: OpenTicket) {
        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.list_message_records(&ticket.conversation_id).await;
            let _ = events.send(SyncEvent::StreamLoaded { ticket, result }).await;
        });
    }

    fn send(&mut self, text: String, reply: oneshot::Sender<Result<(), SyncError>>) {
        if text.trim().is_empty() {
            let _ = reply.send(Err(SyncError::EmptyMessage));
            return;
        }
        let Some(messenger) = self.messenger.clone() else {
            let _ = reply.send(Err(SyncError::MessagingUnavailable));
            return;
        };
        let Some(conversation_id) = self.stream.conversation_id().map(str::to_string) else {
            let _ = reply.send(Err(SyncError::NoConversationSelected));
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = messenger.send_message(&conversation_id, &text).await;
            let _ = events
                .send(SyncEvent::SendFinished {
                    conversation_id,
                    text,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn dispatch_live(&mut self, scope: FeedScope, record: RawStoredRecord) {
        let plan = dispatch::plan(
            scope,
            &record,
            self.reconciler.is_known(&record.session_id),
            self.stream.conversation_id(),
        );
        if plan.forward_to_stream {
            self.stream.on_live_record(&record, Utc::now());
        }
        match plan.list_action {
            ListAction::IncrementalUpdate(conversation_id) => {
                self.fetch_latest(conversation_id, record)
            }
            ListAction::FullRescan => {
                info!(
                    "record for unknown conversation, rescanning (conversation_id={})",
                    record.session_id
                );
                self.start_rescan(RescanMode::Background);
            }
            ListAction::None => {}
        }
    }

    fn fetch_latest(&self, conversation_id: ConversationId, trigger: RawStoredRecord) {
        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.latest_message_record(&conversation_id).await;
            let _ = events
                .send(SyncEvent::LatestFetched {
                    conversation_id,
                    trigger,
                    result,
                })
                .await;
        });
    }

    fn apply_latest(
        &mut self,
        conversation_id: ConversationId,
        trigger: RawStoredRecord,
        result: Result<Option<RawStoredRecord>, BackendError>,
    ) {
        let latest = match result {
            Ok(Some(record)) => record,
            Ok(None) => trigger,
            Err(err) => {
                warn!(
                    "latest record refetch failed, using feed record (conversation_id={}, error={})",
                    conversation_id, err
                );
                trigger
            }
        };
        let count_unread = self.stream.conversation_id() != Some(conversation_id.as_str());
        let outcome = self.reconciler.on_incremental_update(
            &conversation_id,
            Some(&latest),
            Utc::now(),
            count_unread,
        );
        if outcome == IncrementalOutcome::Unknown {
            debug!("conversation left the list before update (conversation_id={conversation_id})");
            self.start_rescan(RescanMode::Background);
        }
    }

    fn start_rescan(&mut self, mode: RescanMode) {
        self.rescans_in_flight += 1;
        if mode.is_foreground() {
            self.foreground_rescans += 1;
        }
        debug!(
            "starting rescan (mode={:?}, in_flight={})",
            mode, self.rescans_in_flight
        );
        let backend = self.backend.clone();
        let formatter = self.reconciler.formatter().clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = collect_rescan(backend.as_ref(), &formatter, Utc::now()).await;
            let _ = events.send(SyncEvent::RescanFinished { mode, result }).await;
        });
    }

    fn clear_error(&mut self, source: ErrorSource) {
        if self.error.as_ref().is_some_and(|error| error.source == source) {
            self.error = None;
        }
    }

    fn publish(&self) {
        let next = ConsoleView {
            conversations: self.reconciler.summaries().to_vec(),
            selected: self.stream.conversation_id().map(str::to_string),
            messages: self.stream.messages().to_vec(),
            stream_state: self.stream.state().clone(),
            loading: self.foreground_rescans > 0,
            error: self.error.clone(),
            visibility: *self.visibility.borrow(),
        };
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn teardown(&mut self) {
        self.subscriptions.clear();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
    }
}

impl Drop for SyncActor {
    fn drop(&mut self) {
        self.teardown();
    }
}
