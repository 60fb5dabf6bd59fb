//! Change feed that tails the history table by sequence id.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use switchboard_config::SyncConfig;
use switchboard_core::{BackendError, ChangeFeed, FeedError, InsertFilter, RecordStream};
use switchboard_protocol::{RawStoredRecord, RecordId};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

/// Consecutive failed polls after which a subscription gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[async_trait]
/// Sequence-ordered access to newly inserted history rows.
pub trait RecordTail: Send + Sync + 'static {
    /// Highest sequence id currently stored.
    async fn latest_record_id(&self) -> Result<Option<RecordId>, BackendError>;

    /// Rows with a sequence id above `after`, ascending.
    async fn records_after(
        &self,
        after: RecordId,
        filter: &InsertFilter,
    ) -> Result<Vec<RawStoredRecord>, BackendError>;
}

/// [`ChangeFeed`] for deployments without a push transport.
///
/// Each subscription starts at the newest stored row and polls for rows
/// inserted after it. Dropping the stream stops the poll loop.
pub struct PollingChangeFeed<T: RecordTail> {
    tail: Arc<T>,
    interval: Duration,
    buffer: usize,
}

impl<T: RecordTail> PollingChangeFeed<T> {
    pub fn new(tail: Arc<T>, interval: Duration, buffer: usize) -> Self {
        Self {
            tail,
            interval,
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(tail: Arc<T>, config: &SyncConfig) -> Self {
        Self::new(tail, config.feed_poll_interval(), config.event_buffer)
    }
}

#[async_trait]
impl<T: RecordTail> ChangeFeed for PollingChangeFeed<T> {
    async fn subscribe(&self, filter: InsertFilter) -> Result<RecordStream, FeedError> {
        let cursor = self.tail.latest_record_id().await?.unwrap_or(0);
        info!(
            "polling subscription started (filter={:?}, cursor={}, interval_ms={})",
            filter,
            cursor,
            self.interval.as_millis()
        );
        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(poll_loop(
            self.tail.clone(),
            filter,
            cursor,
            self.interval,
            tx,
        ));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn poll_loop<T: RecordTail>(
    tail: Arc<T>,
    filter: InsertFilter,
    mut cursor: RecordId,
    interval: Duration,
    tx: mpsc::Sender<Result<RawStoredRecord, FeedError>>,
) {
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("polling subscription dropped (filter={:?})", filter);
                return;
            }
            _ = sleep(interval) => {}
        }
        match tail.records_after(cursor, &filter).await {
            Ok(records) => {
                failures = 0;
                for record in records {
                    cursor = cursor.max(record.id);
                    if !filter.matches(&record) {
                        continue;
                    }
                    if tx.send(Ok(record)).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                failures += 1;
                warn!(
                    "feed poll failed (filter={:?}, attempt={}, error={})",
                    filter, failures, err
                );
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    let _ = tx.send(Err(FeedError::Backend(err))).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PollingChangeFeed, RecordTail};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use switchboard_core::{BackendError, ChangeFeed, FeedError, InsertFilter};
    use switchboard_protocol::{RawStoredRecord, RecordId};
    use tokio_stream::StreamExt;

    #[derive(Default)]
    struct MemoryTail {
        records: Mutex<Vec<RawStoredRecord>>,
        broken: Mutex<bool>,
    }

    impl MemoryTail {
        fn push(&self, id: RecordId, session: &str) {
            self.records.lock().push(RawStoredRecord {
                id,
                session_id: session.to_string(),
                message: json!({"type": "human", "content": format!("#{id}")}),
                data: None,
            });
        }
    }

    #[async_trait]
    impl RecordTail for MemoryTail {
        async fn latest_record_id(&self) -> Result<Option<RecordId>, BackendError> {
            Ok(self.records.lock().iter().map(|record| record.id).max())
        }

        async fn records_after(
            &self,
            after: RecordId,
            _filter: &InsertFilter,
        ) -> Result<Vec<RawStoredRecord>, BackendError> {
            if *self.broken.lock() {
                return Err(BackendError::Transport("down".to_string()));
            }
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|record| record.id > after)
                .cloned()
                .collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_only_rows_inserted_after_subscribe() {
        let tail = Arc::new(MemoryTail::default());
        tail.push(1, "a");
        tail.push(2, "b");
        let feed = PollingChangeFeed::new(tail.clone(), Duration::from_millis(100), 8);
        let mut stream = feed
            .subscribe(InsertFilter::AllConversations)
            .await
            .expect("subscribe");

        tail.push(3, "a");
        tail.push(4, "b");
        let ids: Vec<RecordId> = vec![
            stream.next().await.expect("item").expect("record").id,
            stream.next().await.expect("item").expect("record").id,
        ];
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn scoped_subscription_filters_other_conversations() {
        let tail = Arc::new(MemoryTail::default());
        let feed = PollingChangeFeed::new(tail.clone(), Duration::from_millis(100), 8);
        let mut stream = feed
            .subscribe(InsertFilter::Conversation("a".to_string()))
            .await
            .expect("subscribe");
        tail.push(1, "b");
        tail.push(2, "a");
        let record = stream.next().await.expect("item").expect("record");
        assert_eq!((record.id, record.session_id.as_str()), (2, "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_repeated_failures() {
        let tail = Arc::new(MemoryTail::default());
        *tail.broken.lock() = true;
        let feed = PollingChangeFeed::new(tail, Duration::from_millis(100), 8);
        let mut stream = feed
            .subscribe(InsertFilter::AllConversations)
            .await
            .expect("subscribe");
        match stream.next().await {
            Some(Err(FeedError::Backend(BackendError::Transport(message)))) => {
                assert_eq!(message, "down")
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
