use serde::{Deserialize, Serialize};

use super::JsonMap;

/// A single ingest origin (an RSS feed, a subreddit, a saved search, ...)
/// owned exclusively by one `(user, topic)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    /// Connector registry lookup key, e.g. `"rss"`, `"reddit"`, `"signal"`.
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
    pub config: JsonMap,
    /// Opaque connector-owned pagination state, merged with
    /// `{"last_fetch_at": windowEnd}` by Ingest on each successful run.
    pub cursor: JsonMap,
    pub is_enabled: bool,
    /// Multiplier applied to this source's contribution to the ranking
    /// formula's `sourceEffective` term. `None` defers to the connector
    /// type's default weight.
    pub weight: Option<f64>,
}

impl Source {
    pub fn effective_weight(&self, type_default: f64) -> f64 {
        self.weight.unwrap_or(type_default)
    }
}
