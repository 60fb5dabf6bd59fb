//! Events consumed by the sync actor.
//!
//! Every input to the core (scheduler ticks, fetch completions, feed records
//! and UI commands) is funneled through one queue of [`SyncEvent`]s.

use crate::error::{BackendError, FeedError, SyncError};
use crate::reconciler::RescanMode;
use crate::scheduler::Visibility;
use crate::stream::OpenTicket;
use switchboard_protocol::{CanonicalMessage, ConversationId, ConversationSummary, RawStoredRecord};
use tokio::sync::oneshot;

/// Which subscription delivered a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    /// All-conversations subscription driving the list.
    List,
    /// Subscription scoped to the open conversation.
    Stream,
}

/// Operator requests forwarded by [`crate::SyncHandle`].
#[derive(Debug)]
pub enum Command {
    Refresh,
    Select(ConversationId),
    Close,
    MarkRead(ConversationId),
    LocalEcho(CanonicalMessage),
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    SetVisibility(Visibility),
    Shutdown,
}

/// Input to the sync actor.
#[derive(Debug)]
pub enum SyncEvent {
    /// Refresh interval elapsed.
    Tick,
    Command(Command),
    /// A full rescan completed.
    RescanFinished {
        mode: RescanMode,
        result: Result<Vec<ConversationSummary>, BackendError>,
    },
    /// Latest-record refetch for an incremental update completed.
    LatestFetched {
        conversation_id: ConversationId,
        /// Record that triggered the refetch; used if the refetch fails.
        trigger: RawStoredRecord,
        result: Result<Option<RawStoredRecord>, BackendError>,
    },
    /// Bulk history fetch for an `open` completed.
    StreamLoaded {
        ticket: OpenTicket,
        result: Result<Vec<RawStoredRecord>, BackendError>,
    },
    /// A record arrived on a live subscription.
    LiveRecord {
        scope: FeedScope,
        record: RawStoredRecord,
    },
    /// A subscription could not be established or broke.
    SubscriptionFailed { scope: FeedScope, error: FeedError },
    /// An outbound send completed.
    SendFinished {
        conversation_id: ConversationId,
        text: String,
        result: Result<(), BackendError>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}
