//! Conversation list reconciliation.
//!
//! The list is fed by two sources: full rescans (periodic or on demand) and
//! incremental updates for single conversations driven by the change feed.
//! [`ConversationReconciler`] merges both into one summary per conversation id
//! while preserving the operator-visible unread counts.

use crate::backend::ConversationBackend;
use crate::display::SummaryFormatter;
use crate::error::BackendError;
use crate::normalizer::normalize;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use switchboard_protocol::{ClientRecord, ConversationId, ConversationSummary, RawStoredRecord};

/// Concurrent latest-record fetches during a rescan.
const LATEST_FETCH_CONCURRENCY: usize = 8;

/// Why a rescan ran; decides how its result is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanMode {
    /// First load after start; shows the loading indicator.
    Initial,
    /// Operator-requested refresh; shows the loading indicator.
    Manual,
    /// Interval tick or unknown conversation on the feed.
    Background,
}

impl RescanMode {
    /// Whether the rescan is visible to the operator (loading flag, errors).
    pub fn is_foreground(self) -> bool {
        !matches!(self, RescanMode::Background)
    }
}

/// Result of an incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOutcome {
    /// The summary was refreshed and moved to the top.
    Updated,
    /// The id is not in the list; a rescan is needed.
    Unknown,
    /// The record produced no message; nothing changed.
    Empty,
}

/// Owns the conversation summary list.
#[derive(Debug, Clone, Default)]
pub struct ConversationReconciler {
    summaries: Vec<ConversationSummary>,
    formatter: SummaryFormatter,
}

impl ConversationReconciler {
    pub fn new(formatter: SummaryFormatter) -> Self {
        Self {
            summaries: Vec::new(),
            formatter,
        }
    }

    /// Summaries in display order.
    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn formatter(&self) -> &SummaryFormatter {
        &self.formatter
    }

    pub fn is_known(&self, conversation_id: &str) -> bool {
        self.position(conversation_id).is_some()
    }

    /// Apply a completed rescan.
    ///
    /// Foreground modes replace the id set with `fresh`. Background mode
    /// also keeps ids missing from `fresh`. In both, unread counts carry
    /// over and per id the snippet with the newer activity wins.
    pub fn apply_rescan(&mut self, fresh: Vec<ConversationSummary>, mode: RescanMode) {
        let fresh = dedup_by_id(fresh);
        let mut previous: Vec<Option<ConversationSummary>> =
            std::mem::take(&mut self.summaries).into_iter().map(Some).collect();
        let index: HashMap<ConversationId, usize> = previous
            .iter()
            .enumerate()
            .filter_map(|(pos, summary)| summary.as_ref().map(|summary| (summary.id.clone(), pos)))
            .collect();

        let mut merged = Vec::with_capacity(fresh.len().max(previous.len()));
        for mut summary in fresh {
            if let Some(old) = index.get(&summary.id).and_then(|pos| previous[*pos].take()) {
                carry_over(&mut summary, old);
            }
            merged.push(summary);
        }
        let fresh_len = merged.len();
        if !mode.is_foreground() {
            merged.extend(previous.into_iter().flatten());
        }
        sort_by_recency(&mut merged);
        if mode.is_foreground() {
            info!(
                "conversation list replaced (mode={:?}, conversations={})",
                mode,
                merged.len()
            );
        } else {
            debug!(
                "background rescan merged (fresh={}, kept={}, total={})",
                fresh_len,
                merged.len() - fresh_len,
                merged.len()
            );
        }
        self.summaries = merged;
    }

    /// Refresh one conversation from its latest record.
    ///
    /// `count_unread` is false while the operator has the conversation open.
    pub fn on_incremental_update(
        &mut self,
        conversation_id: &str,
        latest: Option<&RawStoredRecord>,
        now: DateTime<Utc>,
        count_unread: bool,
    ) -> IncrementalOutcome {
        let Some(pos) = self.position(conversation_id) else {
            return IncrementalOutcome::Unknown;
        };
        let Some(message) = latest.and_then(|record| normalize(record, now).pop()) else {
            debug!("incremental update without content (conversation_id={conversation_id})");
            return IncrementalOutcome::Empty;
        };
        let mut summary = self.summaries.remove(pos);
        self.formatter.apply(&mut summary, &message, now);
        if count_unread {
            summary.unread_count = summary.unread_count.saturating_add(1);
        }
        debug!(
            "conversation updated (conversation_id={}, unread={})",
            conversation_id, summary.unread_count
        );
        self.summaries.insert(0, summary);
        IncrementalOutcome::Updated
    }

    /// Reset the unread count. Returns whether the id was known.
    pub fn mark_read(&mut self, conversation_id: &str) -> bool {
        match self.position(conversation_id) {
            Some(pos) => {
                self.summaries[pos].unread_count = 0;
                true
            }
            None => false,
        }
    }

    fn position(&self, conversation_id: &str) -> Option<usize> {
        self.summaries
            .iter()
            .position(|summary| summary.id == conversation_id)
    }
}

/// Fetch everything needed for a fresh summary list.
///
/// Client enrichment is required; the latest record per conversation is best
/// effort and degrades to an empty snippet.
pub async fn collect_rescan(
    backend: &dyn ConversationBackend,
    formatter: &SummaryFormatter,
    now: DateTime<Utc>,
) -> Result<Vec<ConversationSummary>, BackendError> {
    let ids = backend.list_conversation_ids().await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let clients = backend.list_clients_by_ids(&ids).await?;
    let clients: HashMap<&str, &ClientRecord> = clients
        .iter()
        .map(|client| (client.session_id.as_str(), client))
        .collect();

    let latest: Vec<Option<RawStoredRecord>> = stream::iter(ids.iter().cloned())
        .map(|id| async move {
            match backend.latest_message_record(&id).await {
                Ok(record) => record,
                Err(err) => {
                    warn!("latest record fetch failed (conversation_id={id}, error={err})");
                    None
                }
            }
        })
        .buffered(LATEST_FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut summaries: Vec<ConversationSummary> = ids
        .iter()
        .zip(latest)
        .map(|(id, record)| {
            let mut summary = ConversationSummary::new(id.clone(), clients.get(id.as_str()).copied());
            if let Some(message) = record.and_then(|record| normalize(&record, now).pop()) {
                formatter.apply(&mut summary, &message, now);
            }
            summary
        })
        .collect();
    sort_by_recency(&mut summaries);
    Ok(summaries)
}

/// Latest activity first; conversations without activity last. Stable.
fn sort_by_recency(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
}

/// Unread only moves through incremental updates and `mark_read`.
fn carry_over(summary: &mut ConversationSummary, old: ConversationSummary) {
    summary.unread_count = old.unread_count;
    if old.last_activity > summary.last_activity {
        summary.last_message = old.last_message;
        summary.last_message_time = old.last_message_time;
        summary.last_activity = old.last_activity;
    }
}

fn dedup_by_id(summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    let mut seen = HashSet::new();
    summaries
        .into_iter()
        .filter(|summary| {
            let fresh = seen.insert(summary.id.clone());
            if !fresh {
                warn!("duplicate conversation in rescan (conversation_id={})", summary.id);
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ConversationReconciler, IncrementalOutcome, RescanMode};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use switchboard_protocol::{ConversationSummary, RawStoredRecord};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn summary(id: &str, minutes_ago: Option<i64>, snippet: &str) -> ConversationSummary {
        let mut summary = ConversationSummary::new(id, None);
        summary.last_activity = minutes_ago.map(|minutes| now() - Duration::minutes(minutes));
        summary.last_message = snippet.to_string();
        summary
    }

    fn record(id: i64, session: &str, text: &str) -> RawStoredRecord {
        RawStoredRecord {
            id,
            session_id: session.to_string(),
            message: json!({"type": "human", "content": text}),
            data: Some("2024-07-01T11:59:00Z".to_string()),
        }
    }

    fn ids(reconciler: &ConversationReconciler) -> Vec<&str> {
        reconciler
            .summaries()
            .iter()
            .map(|summary| summary.id.as_str())
            .collect()
    }

    fn unread(reconciler: &ConversationReconciler, id: &str) -> u32 {
        reconciler
            .summaries()
            .iter()
            .find(|summary| summary.id == id)
            .map(|summary| summary.unread_count)
            .unwrap_or_default()
    }

    #[test]
    fn foreground_rescan_replaces_list() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(1), "x")], RescanMode::Initial);
        reconciler.apply_rescan(vec![summary("b", Some(2), "y")], RescanMode::Manual);
        assert_eq!(ids(&reconciler), vec!["b"]);
    }

    #[test]
    fn late_initial_rescan_keeps_unread_raised_meanwhile() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(5), "first")], RescanMode::Background);
        reconciler.on_incremental_update("a", Some(&record(4, "a", "chegou")), now(), true);
        assert_eq!(unread(&reconciler, "a"), 1);

        reconciler.apply_rescan(
            vec![summary("a", Some(30), "stale"), summary("b", Some(40), "b")],
            RescanMode::Initial,
        );
        assert_eq!(unread(&reconciler, "a"), 1);
        assert_eq!(reconciler.summaries()[0].last_message, "chegou");
        assert_eq!(ids(&reconciler), vec!["a", "b"]);
    }

    #[test]
    fn manual_rescan_keeps_unread_but_drops_missing_ids() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(
            vec![summary("a", Some(10), "a"), summary("b", Some(20), "b")],
            RescanMode::Initial,
        );
        reconciler.on_incremental_update("b", Some(&record(1, "b", "oi")), now(), true);
        reconciler.on_incremental_update("b", Some(&record(2, "b", "oi?")), now(), true);

        reconciler.apply_rescan(vec![summary("b", Some(0), "oi?")], RescanMode::Manual);
        assert_eq!(ids(&reconciler), vec!["b"]);
        assert_eq!(unread(&reconciler, "b"), 2);
    }

    #[test]
    fn background_rescan_keeps_unread_and_missing_ids() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(
            vec![summary("a", Some(10), "old a"), summary("b", Some(20), "old b")],
            RescanMode::Initial,
        );
        reconciler.on_incremental_update("a", Some(&record(5, "a", "new a")), now(), true);
        reconciler.on_incremental_update("a", Some(&record(6, "a", "newer a")), now(), true);
        assert_eq!(unread(&reconciler, "a"), 2);

        reconciler.apply_rescan(
            vec![summary("c", Some(0), "c"), summary("a", Some(1), "rescanned a")],
            RescanMode::Background,
        );
        assert_eq!(unread(&reconciler, "a"), 2);
        assert_eq!(ids(&reconciler), vec!["c", "a", "b"]);
    }

    #[test]
    fn background_rescan_prefers_newer_snippet() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(1), "live")], RescanMode::Initial);
        reconciler.apply_rescan(vec![summary("a", Some(30), "stale")], RescanMode::Background);
        assert_eq!(reconciler.summaries()[0].last_message, "live");
        reconciler.apply_rescan(vec![summary("a", Some(0), "fresher")], RescanMode::Background);
        assert_eq!(reconciler.summaries()[0].last_message, "fresher");
    }

    #[test]
    fn overlapping_background_rescans_converge() {
        let base = vec![summary("a", Some(50), "a0"), summary("b", Some(40), "b0")];
        let first = vec![summary("a", Some(5), "a1"), summary("c", Some(30), "c1")];
        let second = vec![summary("b", Some(3), "b2"), summary("a", Some(20), "a2")];

        let mut left = ConversationReconciler::default();
        left.apply_rescan(base.clone(), RescanMode::Initial);
        left.on_incremental_update("b", Some(&record(1, "b", "hey")), now(), true);
        let mut right = left.clone();

        left.apply_rescan(first.clone(), RescanMode::Background);
        left.apply_rescan(second.clone(), RescanMode::Background);
        right.apply_rescan(second, RescanMode::Background);
        right.apply_rescan(first, RescanMode::Background);

        assert_eq!(left.summaries(), right.summaries());
        assert_eq!(unread(&left, "b"), 1);
    }

    #[test]
    fn background_rescan_never_decreases_unread() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(1), "x")], RescanMode::Initial);
        for id in 0..3 {
            reconciler.on_incremental_update("a", Some(&record(id, "a", "ping")), now(), true);
        }
        for _ in 0..3 {
            reconciler.apply_rescan(vec![summary("a", Some(2), "x")], RescanMode::Background);
            assert_eq!(unread(&reconciler, "a"), 3);
        }
        assert!(reconciler.mark_read("a"));
        assert_eq!(unread(&reconciler, "a"), 0);
        assert!(!reconciler.mark_read("missing"));
    }

    #[test]
    fn incremental_update_moves_summary_to_top() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(
            vec![summary("a", Some(1), "a"), summary("b", Some(2), "b")],
            RescanMode::Initial,
        );
        let outcome = reconciler.on_incremental_update(
            "b",
            Some(&record(9, "b", "precisa remarcar")),
            now(),
            true,
        );
        assert_eq!(outcome, IncrementalOutcome::Updated);
        assert_eq!(ids(&reconciler), vec!["b", "a"]);
        let top = &reconciler.summaries()[0];
        assert_eq!(top.last_message, "precisa remarcar");
        assert_eq!(top.last_message_time, "11:59");
        assert_eq!(top.unread_count, 1);
    }

    #[test]
    fn incremental_update_for_open_conversation_does_not_count_unread() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(1), "a")], RescanMode::Initial);
        reconciler.on_incremental_update("a", Some(&record(1, "a", "hi")), now(), false);
        assert_eq!(unread(&reconciler, "a"), 0);
        assert_eq!(reconciler.summaries()[0].last_message, "hi");
    }

    #[test]
    fn incremental_update_for_unknown_or_empty_changes_nothing() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(vec![summary("a", Some(1), "keep")], RescanMode::Initial);
        assert_eq!(
            reconciler.on_incremental_update("z", Some(&record(1, "z", "hi")), now(), true),
            IncrementalOutcome::Unknown
        );
        let empty = RawStoredRecord {
            id: 2,
            session_id: "a".to_string(),
            message: json!({"messages": []}),
            data: None,
        };
        assert_eq!(
            reconciler.on_incremental_update("a", Some(&empty), now(), true),
            IncrementalOutcome::Empty
        );
        assert_eq!(
            reconciler.on_incremental_update("a", None, now(), true),
            IncrementalOutcome::Empty
        );
        assert_eq!(reconciler.summaries()[0].last_message, "keep");
        assert_eq!(unread(&reconciler, "a"), 0);
        assert!(!reconciler.is_known("z"));
    }

    #[test]
    fn duplicate_ids_in_rescan_are_collapsed() {
        let mut reconciler = ConversationReconciler::default();
        reconciler.apply_rescan(
            vec![summary("a", Some(1), "first"), summary("a", Some(2), "second")],
            RescanMode::Initial,
        );
        assert_eq!(ids(&reconciler), vec!["a"]);
        assert_eq!(reconciler.summaries()[0].last_message, "first");
    }
}
