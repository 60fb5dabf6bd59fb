//! Routing of live records and ownership of feed subscriptions.

use crate::event::{FeedScope, SyncEvent};
use crate::feed::{ChangeFeed, InsertFilter};
use log::{debug, info, warn};
use std::sync::Arc;
use switchboard_protocol::{ConversationId, RawStoredRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

/// What the conversation list should do with a live record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListAction {
    /// Known conversation: refetch its latest record.
    IncrementalUpdate(ConversationId),
    /// Unknown conversation: rescan everything.
    FullRescan,
    /// Record does not concern the list.
    None,
}

/// Routing decision for one live record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub list_action: ListAction,
    /// Whether the open stream should see the record.
    pub forward_to_stream: bool,
}

/// Decide how a live record is routed.
///
/// `known` tells whether the record's conversation is already in the list and
/// `open_conversation` is the id the stream is showing, if any.
pub fn plan(
    scope: FeedScope,
    record: &RawStoredRecord,
    known: bool,
    open_conversation: Option<&str>,
) -> DispatchPlan {
    let is_open = open_conversation == Some(record.session_id.as_str());
    match scope {
        FeedScope::List => DispatchPlan {
            list_action: if known {
                ListAction::IncrementalUpdate(record.session_id.clone())
            } else {
                ListAction::FullRescan
            },
            forward_to_stream: is_open,
        },
        FeedScope::Stream => DispatchPlan {
            list_action: ListAction::None,
            forward_to_stream: is_open,
        },
    }
}

/// Aborts the subscription pump when dropped, which drops the feed stream.
#[derive(Debug)]
pub struct SubscriptionGuard {
    filter: InsertFilter,
    task: JoinHandle<()>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!("tearing down subscription (filter={:?})", self.filter);
        self.task.abort();
    }
}

/// The list subscription and the optional open-conversation subscription.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    list: Option<SubscriptionGuard>,
    stream: Option<SubscriptionGuard>,
}

impl SubscriptionSet {
    pub fn set_list(&mut self, guard: SubscriptionGuard) {
        self.list = Some(guard);
    }

    /// Replace the stream subscription; the previous one is torn down first.
    pub fn set_stream(&mut self, guard: Option<SubscriptionGuard>) {
        self.stream = None;
        self.stream = guard;
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.list = None;
        self.stream = None;
    }
}

/// Subscribe to `feed` and pump its records into the actor queue.
pub fn spawn_subscription(
    feed: Arc<dyn ChangeFeed>,
    filter: InsertFilter,
    scope: FeedScope,
    events: mpsc::Sender<SyncEvent>,
) -> SubscriptionGuard {
    let task_filter = filter.clone();
    let task = tokio::spawn(async move {
        let mut records = match feed.subscribe(task_filter.clone()).await {
            Ok(records) => records,
            Err(error) => {
                let _ = events
                    .send(SyncEvent::SubscriptionFailed { scope, error })
                    .await;
                return;
            }
        };
        info!("subscription established (scope={:?}, filter={:?})", scope, task_filter);
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => {
                    if events
                        .send(SyncEvent::LiveRecord { scope, record })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => warn!("change feed delivery error (scope={:?}, error={})", scope, err),
            }
        }
        info!("subscription ended (scope={:?}, filter={:?})", scope, task_filter);
    });
    SubscriptionGuard { filter, task }
}
