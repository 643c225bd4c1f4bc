//! Digest Writer (§4.16) — persists the final selected, ranked candidates as
//! an ordered digest in a single transaction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::model::{Digest, DigestItem, DigestMode, JsonMap};
use crate::storage::Storage;

use super::ranking::RankedCandidate;
use super::candidates::CandidateRef;

/// Build the `DigestItem` rows for one ordered, selected set (§4.16: `rank`
/// is `i+1`; exactly one of `clusterId`/`contentItemId` is set per row).
fn build_digest_items(
    digest_id: &str,
    selected: &[RankedCandidate],
    summaries: &HashMap<String, JsonMap>,
) -> Vec<DigestItem> {
    selected
        .iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let (cluster_id, content_item_id) = match &candidate.row.candidate_ref {
                CandidateRef::Cluster { cluster_id } => (Some(cluster_id.clone()), None),
                CandidateRef::Item { content_item_id } => (None, Some(content_item_id.clone())),
            };
            DigestItem {
                digest_id: digest_id.to_string(),
                rank: (idx + 1) as u32,
                cluster_id,
                content_item_id,
                score: candidate.score,
                triage_json: Some(candidate.triage_json.clone()),
                summary_json: summaries.get(&candidate.row.candidate_id()).cloned(),
            }
        })
        .collect()
}

/// Write the digest for one `(user, topic, window)` run, per §4.16's
/// upsert-then-replace transaction.
pub fn write_digest(
    storage: &Storage,
    user_id: &str,
    topic_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    mode: DigestMode,
    selected: &[RankedCandidate],
    summaries: &HashMap<String, JsonMap>,
) -> StorageResult<String> {
    let digest = Digest {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        topic_id: topic_id.to_string(),
        window_start,
        window_end,
        mode,
        created_at: Utc::now(),
    };
    // `upsert_digest_with_items` resolves the real digest id itself (it may
    // differ from `digest.id` on an existing-row conflict) and ignores
    // `DigestItem.digest_id` entirely, so a placeholder here is fine.
    let items = build_digest_items(&digest.id, selected, summaries);
    storage.upsert_digest_with_items(&digest, &items)
}
