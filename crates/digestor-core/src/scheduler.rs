//! Scheduler (§4.1) — a pure function over a `Topic` and the current
//! instant, with no I/O of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::model::{DigestMode, Topic};

/// One due window emitted by [`due_windows`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mode: DigestMode,
    pub trigger: &'static str,
}

/// Produce the bounded set of due windows for one topic at `now`, per §4.1.
///
/// Windows are emitted in strictly increasing `window_end` (§5 ordering
/// guarantee). The cursor advance itself is the caller's responsibility —
/// this function never mutates the topic.
pub fn due_windows(topic: &Topic, now: DateTime<Utc>, config: &SchedulerConfig) -> Vec<DueWindow> {
    if !topic.digest_schedule_enabled {
        return Vec::new();
    }
    if topic.digest_interval_minutes <= 0 {
        return Vec::new();
    }

    let interval_ms = topic.digest_interval_minutes * 60_000;
    let now_ms = now.timestamp_millis();

    let mut cursor_end_ms = match topic.digest_cursor_end {
        Some(c) => c.timestamp_millis(),
        None => (now_ms / 60_000) * 60_000 - interval_ms,
    };

    let min_window_ms = config.min_window_seconds as i64 * 1000;
    let lag_ms = config.lag_seconds as i64 * 1000;

    let mut windows = Vec::new();
    for _ in 0..config.max_backfill_windows {
        let window_start_ms = cursor_end_ms;
        let window_end_ms = cursor_end_ms + interval_ms;

        if window_end_ms <= now_ms - lag_ms && interval_ms >= min_window_ms {
            windows.push(DueWindow {
                window_start: ms_to_dt(window_start_ms),
                window_end: ms_to_dt(window_end_ms),
                mode: topic.digest_mode,
                trigger: "scheduled",
            });
        }
        cursor_end_ms = window_end_ms;
    }
    windows
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}
