//! Live change-feed seam and an in-process implementation.

use crate::error::FeedError;
use async_trait::async_trait;
use log::{debug, warn};
use std::pin::Pin;
use switchboard_protocol::{ConversationId, RawStoredRecord};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

/// Stream of inserted history rows. Dropping it ends the subscription.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<RawStoredRecord, FeedError>> + Send>>;

/// Which inserts a subscription wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InsertFilter {
    /// Inserts into any conversation.
    AllConversations,
    /// Inserts whose conversation id equals the given one.
    Conversation(ConversationId),
}

impl InsertFilter {
    pub fn matches(&self, record: &RawStoredRecord) -> bool {
        match self {
            InsertFilter::AllConversations => true,
            InsertFilter::Conversation(id) => record.session_id == *id,
        }
    }
}

#[async_trait]
/// Push notifications for newly inserted history rows.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription. Records arrive in backend insertion order.
    async fn subscribe(&self, filter: InsertFilter) -> Result<RecordStream, FeedError>;
}

/// Broadcast-backed feed for embedding and tests.
///
/// Whoever writes history rows in-process calls [`BroadcastChangeFeed::publish`];
/// every live subscription whose filter matches receives the row.
#[derive(Clone, Debug)]
pub struct BroadcastChangeFeed {
    sender: broadcast::Sender<RawStoredRecord>,
}

impl BroadcastChangeFeed {
    /// Create a feed with the given per-subscriber buffer.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        debug!("broadcast change feed initialized (buffer={})", buffer);
        Self { sender }
    }

    /// Publish an inserted row. Returns the number of subscribers reached.
    pub fn publish(&self, record: RawStoredRecord) -> usize {
        self.sender.send(record).unwrap_or(0)
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl ChangeFeed for BroadcastChangeFeed {
    async fn subscribe(&self, filter: InsertFilter) -> Result<RecordStream, FeedError> {
        debug!("broadcast feed subscription opened (filter={:?})", filter);
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            match item {
                Ok(record) if filter.matches(&record) => Some(Ok(record)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("change feed subscriber lagged (skipped={skipped})");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
