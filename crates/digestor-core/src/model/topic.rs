use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tier used to select LLM models and batch sizes for a run.
///
/// Ordered low < normal < high so callers can clamp with `min`/`max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMode {
    Low,
    Normal,
    High,
}

impl fmt::Display for DigestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DigestMode::Low => "low",
            DigestMode::Normal => "normal",
            DigestMode::High => "high",
        })
    }
}

impl FromStr for DigestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(DigestMode::Low),
            "normal" => Ok(DigestMode::Normal),
            "high" => Ok(DigestMode::High),
            other => Err(format!("unknown digest mode: {other}")),
        }
    }
}

impl Default for DigestMode {
    fn default() -> Self {
        DigestMode::Normal
    }
}

/// A recurring `(user, named scope)` subscription that the scheduler ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub digest_schedule_enabled: bool,
    /// Must be > 0; the scheduler treats a non-positive value as a
    /// configuration error rather than silently clamping it.
    pub digest_interval_minutes: i64,
    pub digest_mode: DigestMode,
    /// Clamped to `[0, 100]` by callers; interpreted as a bound on output
    /// size by the diversity selection stage.
    pub digest_depth: u8,
    pub digest_cursor_end: Option<DateTime<Utc>>,
    /// `None` disables recency decay in the ranking formula.
    pub decay_hours: Option<f64>,
}

impl Topic {
    pub fn is_depth_valid(&self) -> bool {
        self.digest_depth <= 100
    }
}
