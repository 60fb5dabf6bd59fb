//! Fixed-cadence refresh ticks gated on host visibility.

use crate::event::SyncEvent;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Whether the operator can currently see the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl Visibility {
    pub fn from_visible(visible: bool) -> Self {
        if visible {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }
}

/// Emits [`SyncEvent::Tick`] every `interval` while visible.
///
/// The first tick fires one full interval after start. While hidden no ticks
/// are emitted; on becoming visible again the cadence restarts from that
/// moment without an immediate tick.
#[derive(Debug, Clone, Copy)]
pub struct RefreshScheduler {
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run the scheduler until `events` or `visibility` closes.
    pub fn spawn(
        self,
        mut visibility: watch::Receiver<Visibility>,
        events: mpsc::Sender<SyncEvent>,
    ) -> JoinHandle<()> {
        let period = self.interval;
        tokio::spawn(async move {
            debug!("refresh scheduler started (interval_ms={})", period.as_millis());
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *visibility.borrow_and_update() == Visibility::Hidden {
                    debug!("refresh scheduler suspended");
                    loop {
                        if visibility.changed().await.is_err() {
                            return;
                        }
                        if *visibility.borrow_and_update() == Visibility::Visible {
                            break;
                        }
                    }
                    debug!("refresh scheduler resumed");
                    ticker.reset();
                    continue;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if events.send(SyncEvent::Tick).await.is_err() {
                            return;
                        }
                    }
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }
}
