//! Display strings derived for conversation summaries.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use log::warn;
use std::fmt::Write;
use switchboard_config::{DisplayConfig, SyncConfig};
use switchboard_protocol::{CanonicalMessage, ConversationSummary};

const ELLIPSIS: char = '…';

/// Formats last-message snippets and times for the conversation list.
#[derive(Debug, Clone)]
pub struct SummaryFormatter {
    offset: FixedOffset,
    time_format: String,
    date_format: String,
    snippet_max_chars: usize,
}

impl Default for SummaryFormatter {
    fn default() -> Self {
        Self::from_config(&DisplayConfig::default(), &SyncConfig::default())
    }
}

impl SummaryFormatter {
    pub fn from_config(display: &DisplayConfig, sync: &SyncConfig) -> Self {
        let offset = display
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(
                    "utc offset out of range, using UTC (utc_offset_minutes={})",
                    display.utc_offset_minutes
                );
                Utc.fix()
            });
        Self {
            offset,
            time_format: display.time_format.clone(),
            date_format: display.date_format.clone(),
            snippet_max_chars: sync.snippet_max_chars,
        }
    }

    /// Time-of-day for messages from the current local day, a date otherwise.
    pub fn format_time(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        let format = if local.date_naive() == now.with_timezone(&self.offset).date_naive() {
            &self.time_format
        } else {
            &self.date_format
        };
        let mut rendered = String::new();
        // chrono reports bad format strings through fmt::Error.
        if write!(rendered, "{}", local.format(format)).is_err() {
            warn!("invalid display format, falling back to RFC 3339 (format={format})");
            return local.to_rfc3339();
        }
        rendered
    }

    /// Single-line snippet bounded by the configured length.
    pub fn snippet(&self, content: &str) -> String {
        let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.snippet_max_chars == 0 || flat.chars().count() <= self.snippet_max_chars {
            return flat;
        }
        let mut cut: String = flat.chars().take(self.snippet_max_chars - 1).collect();
        cut.push(ELLIPSIS);
        cut
    }

    /// Write a message into the last-message fields of a summary.
    pub fn apply(
        &self,
        summary: &mut ConversationSummary,
        message: &CanonicalMessage,
        now: DateTime<Utc>,
    ) {
        summary.last_message = self.snippet(&message.content);
        summary.last_message_time = self.format_time(message.timestamp, now);
        summary.last_activity = Some(message.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::SummaryFormatter;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use switchboard_config::{DisplayConfig, SyncConfig};

    fn formatter(offset_minutes: i32, max_chars: usize) -> SummaryFormatter {
        let display = DisplayConfig {
            utc_offset_minutes: offset_minutes,
            ..DisplayConfig::default()
        };
        let sync = SyncConfig {
            snippet_max_chars: max_chars,
            ..SyncConfig::default()
        };
        SummaryFormatter::from_config(&display, &sync)
    }

    #[test]
    fn same_day_shows_time_other_days_show_date() {
        let formatter = formatter(0, 120);
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2024, 3, 10, 9, 5, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(formatter.format_time(today, now), "09:05");
        assert_eq!(formatter.format_time(earlier, now), "09/03/2024");
    }

    #[test]
    fn offset_shifts_the_local_day() {
        let formatter = formatter(-180, 120);
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(formatter.format_time(at, now), "22:30");
    }

    #[test]
    fn unrepresentable_offset_falls_back_to_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 9, 5, 0).unwrap();
        for minutes in [i32::MAX, i32::MIN, 25 * 60] {
            assert_eq!(formatter(minutes, 120).format_time(at, now), "09:05");
        }
    }

    #[test]
    fn snippet_flattens_and_truncates() {
        let formatter = formatter(0, 10);
        assert_eq!(formatter.snippet("short"), "short");
        assert_eq!(formatter.snippet("line one\nline   two"), "line one …");
        assert_eq!(formatter.snippet("ção ção ção"), "ção ção ç…");
    }
}
