//! Cluster Stage (§4.6) — assigns unclustered, embedded in-window items to
//! the nearest hot cluster, or seeds a new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::model::{Cluster, ClusterItem};
use crate::storage::Storage;
use crate::vector::CandidateVectorIndex;

/// Counters returned by [`run_cluster`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResult {
    pub attempted: usize,
    pub created: usize,
    pub attached: usize,
    pub skipped_no_embedding: usize,
}

/// Run Cluster over one `(topic, window)`, per §4.6's nearest-centroid
/// assignment rule.
#[allow(clippy::too_many_arguments)]
pub fn run_cluster(
    storage: &Storage,
    user_id: &str,
    topic_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_items: usize,
    lookback_days: i64,
    similarity_threshold: f64,
    update_centroid: bool,
) -> StorageResult<ClusterResult> {
    let mut result = ClusterResult::default();
    let candidates = storage.unclustered_items_in_window(topic_id, window_start, window_end, max_items)?;

    let cutoff = window_end - chrono::Duration::days(lookback_days);

    for (item, embedding) in candidates {
        result.attempted += 1;
        let Some(embedding) = embedding else {
            result.skipped_no_embedding += 1;
            continue;
        };

        let hot = storage.hot_clusters(topic_id, cutoff)?;
        let entries: Vec<(&str, &[f64])> = hot.iter().map(|c| (c.id.as_str(), c.centroid_vector.as_slice())).collect();
        let index = CandidateVectorIndex::new(entries);
        let best = index.nearest(&embedding.vector);

        let matched = best.filter(|n| n.similarity >= similarity_threshold);

        match matched {
            Some(neighbor) => {
                let cluster_id = neighbor.id.to_string();
                let inserted = storage.insert_cluster_item(&ClusterItem {
                    cluster_id: cluster_id.clone(),
                    content_item_id: item.id.clone(),
                    similarity: neighbor.similarity,
                })?;
                if !inserted {
                    continue;
                }

                let now = Utc::now();
                if update_centroid {
                    if let Some(cluster) = hot.iter().find(|c| c.id == cluster_id) {
                        let n = cluster.member_count as f64;
                        let new_centroid: Vec<f64> = cluster
                            .centroid_vector
                            .iter()
                            .zip(embedding.vector.iter())
                            .map(|(c, v)| (c * n + v) / (n + 1.0))
                            .collect();
                        storage.update_cluster(
                            &cluster_id,
                            &new_centroid,
                            cluster.member_count + 1,
                            now,
                            Some(&item.id),
                        )?;
                    } else {
                        storage.touch_cluster(&cluster_id, now)?;
                    }
                } else {
                    storage.touch_cluster(&cluster_id, now)?;
                }

                result.attached += 1;
            }
            None => {
                let now = Utc::now();
                storage.create_cluster(
                    user_id,
                    topic_id,
                    &Cluster {
                        id: Uuid::new_v4().to_string(),
                        user_id: user_id.to_string(),
                        representative_content_item_id: Some(item.id.clone()),
                        centroid_vector: embedding.vector.clone(),
                        updated_at: now,
                        member_count: 1,
                    },
                )?;
                result.created += 1;
            }
        }
    }

    Ok(result)
}
