use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JsonMap;

/// A normalized, deduplicatable unit of ingested content.
///
/// `#[non_exhaustive]` because the upsert keying rules in Ingest (§4.3) give
/// external callers several legitimate ways to construct one; adding a field
/// later should not be a breaking change for downstream construction sites.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub user_id: String,
    pub source_id: String,
    pub source_type: String,
    pub external_id: Option<String>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub metadata: JsonMap,
    pub raw: JsonMap,
    pub hash_url: Option<String>,
    pub hash_text: Option<String>,
    pub duplicate_of_content_item_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of_content_item_id.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A "signal bundle": produced by an LLM-backed search source rather
    /// than a direct feed, identifiable by the absence of a canonical URL
    /// on an otherwise normal item from a signal-type source.
    pub fn is_signal_bundle(&self) -> bool {
        self.source_type == "signal" && self.canonical_url.is_none()
    }

    /// Best-effort timestamp used for window membership and ordering:
    /// published time if known, else fetch time.
    pub fn candidate_at(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.fetched_at)
    }
}

/// The connector-produced draft normalized from a raw provider payload;
/// the shape Ingest upserts into a `ContentItem`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItemDraft {
    pub source_type: String,
    pub external_id: Option<String>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: JsonMap,
    #[serde(default)]
    pub raw: JsonMap,
}

/// Idempotent membership link between a `ContentItem` and the `Source` that
/// surfaced it; never deleted, inserted at most once per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItemSource {
    pub content_item_id: String,
    pub source_id: String,
    pub added_at: DateTime<Utc>,
}
