use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Vector;

/// A group of related items, anchored on a running-mean centroid.
///
/// `representative_content_item_id` is filled lazily (the first member with
/// a usable title wins, per §4.7) rather than always being the anchor item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub user_id: String,
    pub representative_content_item_id: Option<String>,
    pub centroid_vector: Vector,
    pub updated_at: DateTime<Utc>,
    /// Running member count, needed to compute the incremental mean in
    /// `centroid' = (centroid * n + v) / (n + 1)`; not part of the public
    /// spec table but required to implement its update rule without
    /// re-scanning `cluster_items` on every assignment.
    pub member_count: u64,
}

/// Membership edge between a `Cluster` and the `ContentItem` assigned to it.
///
/// Unique on `content_item_id`: a content item belongs to at most one
/// cluster (§3, enforced by a unique index in the storage gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterItem {
    pub cluster_id: String,
    pub content_item_id: String,
    pub similarity: f64,
}
