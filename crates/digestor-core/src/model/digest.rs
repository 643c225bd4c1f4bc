use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::topic::DigestMode;
use super::JsonMap;

/// The persisted output of one pipeline run for one `(user, topic, window)`.
///
/// Unique on `(user_id, topic_id, window_start, window_end, mode)`; a
/// re-run for the same key upserts in place rather than creating a
/// duplicate history row (§4.16).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mode: DigestMode,
    pub created_at: DateTime<Utc>,
}

/// One ranked, selected entry within a `Digest`.
///
/// Exactly one of `cluster_id` / `content_item_id` is set; `rank` is dense
/// and contiguous starting at 1 within a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub digest_id: String,
    pub rank: u32,
    pub cluster_id: Option<String>,
    pub content_item_id: Option<String>,
    pub score: f64,
    pub triage_json: Option<JsonMap>,
    pub summary_json: Option<JsonMap>,
}

impl DigestItem {
    /// Exactly one of the two candidate-reference fields must be set; this
    /// is a precondition the Digest Writer enforces before persisting.
    pub fn has_exactly_one_reference(&self) -> bool {
        self.cluster_id.is_some() != self.content_item_id.is_some()
    }
}
