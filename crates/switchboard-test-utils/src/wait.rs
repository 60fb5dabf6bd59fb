use std::time::Duration;
use switchboard_core::{BroadcastChangeFeed, ConsoleView};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until the published view satisfies `predicate`.
pub async fn wait_for_view<F>(view: &mut watch::Receiver<ConsoleView>, predicate: F) -> ConsoleView
where
    F: FnMut(&ConsoleView) -> bool,
{
    let current = timeout(WAIT_TIMEOUT, view.wait_for(predicate))
        .await
        .expect("timed out waiting for view")
        .expect("view channel closed");
    current.clone()
}

/// Wait until the feed has exactly `count` live subscriptions.
pub async fn wait_for_subscribers(feed: &BroadcastChangeFeed, count: usize) {
    timeout(WAIT_TIMEOUT, async {
        while feed.subscriber_count() != count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {count} subscribers (current={})",
            feed.subscriber_count()
        )
    });
}
