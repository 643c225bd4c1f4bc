//! Dedupe Stage (§4.5) — marks near-duplicates by nearest-older-neighbor
//! vector lookup within a bounded lookback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::storage::Storage;
use crate::vector::CandidateVectorIndex;

/// Counters returned by [`run_dedupe`] (§4.5, scenario 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeResult {
    pub attempted: usize,
    pub matches: usize,
    pub deduped: usize,
}

/// Run Dedupe over one `(topic, window)`, per §4.5's algorithm. The
/// threshold is deliberately high (default 0.995): false positives are
/// worse than false negatives.
pub fn run_dedupe(
    storage: &Storage,
    topic_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_items: usize,
    lookback_days: i64,
    similarity_threshold: f64,
) -> StorageResult<DedupeResult> {
    let mut result = DedupeResult::default();
    let candidates = storage.embedded_items_in_window(topic_id, window_start, window_end, max_items)?;
    result.attempted = candidates.len();

    for (item, embedding) in &candidates {
        let before = item.candidate_at();
        let lookback_start = before - chrono::Duration::days(lookback_days);
        let older = storage.embedded_items_before(topic_id, lookback_start, before)?;
        if older.is_empty() {
            continue;
        }

        let entries: Vec<(&str, &[f64])> = older
            .iter()
            .map(|(older_item, older_embedding)| (older_item.id.as_str(), older_embedding.vector.as_slice()))
            .collect();
        let index = CandidateVectorIndex::new(entries);

        if let Some(neighbor) = index.nearest(&embedding.vector) {
            if neighbor.similarity >= similarity_threshold {
                result.matches += 1;
                storage.mark_duplicate(&item.id, neighbor.id)?;
                result.deduped += 1;
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentItemDraft, DigestMode, Source, Topic, User};
    use chrono::TimeZone;

    fn setup(storage: &Storage) {
        storage.upsert_user(&User::new("u1")).unwrap();
        storage
            .upsert_topic(&Topic {
                id: "t1".into(),
                user_id: "u1".into(),
                name: "rust".into(),
                digest_schedule_enabled: true,
                digest_interval_minutes: 60,
                digest_mode: DigestMode::Normal,
                digest_depth: 20,
                digest_cursor_end: None,
                decay_hours: None,
            })
            .unwrap();
        storage
            .upsert_source(&Source {
                id: "s1".into(),
                user_id: "u1".into(),
                topic_id: "t1".into(),
                source_type: "rss".into(),
                name: "feed".into(),
                config: Default::default(),
                cursor: Default::default(),
                is_enabled: true,
                weight: None,
            })
            .unwrap();
    }

    fn insert_item(storage: &Storage, external_id: &str, published_at: DateTime<Utc>, vector: Vec<f64>) -> String {
        let draft = ContentItemDraft {
            source_type: "rss".into(),
            external_id: Some(external_id.into()),
            title: Some(format!("item {external_id}")),
            published_at: Some(published_at),
            ..Default::default()
        };
        let (id, _) = storage.upsert_content_item_draft("u1", "s1", "rss", &draft, published_at).unwrap();
        storage.link_content_item_source(&id, "s1", published_at).unwrap();
        storage
            .upsert_embedding(&crate::model::Embedding {
                content_item_id: id.clone(),
                model: "hash-embed-v1".into(),
                dims: vector.len(),
                vector,
            })
            .unwrap();
        id
    }

    #[test]
    fn marks_near_duplicate_of_older_item() {
        let storage = Storage::open_in_memory().unwrap();
        setup(&storage);
        let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap();
        let id1 = insert_item(&storage, "a", t1, vec![1.0, 0.0]);
        let id2 = insert_item(&storage, "b", t2, vec![0.999, 0.045]);

        let window_start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        let result = run_dedupe(&storage, "t1", window_start, window_end, 500, 30, 0.99).unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(result.matches, 1);
        assert_eq!(result.deduped, 1);

        let item2 = storage.get_content_item(&id2).unwrap().unwrap();
        assert_eq!(item2.duplicate_of_content_item_id.as_deref(), Some(id1.as_str()));
        let item1 = storage.get_content_item(&id1).unwrap().unwrap();
        assert!(item1.duplicate_of_content_item_id.is_none());
    }

    #[test]
    fn dissimilar_items_are_not_deduped() {
        let storage = Storage::open_in_memory().unwrap();
        setup(&storage);
        let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap();
        insert_item(&storage, "a", t1, vec![1.0, 0.0]);
        insert_item(&storage, "b", t2, vec![0.0, 1.0]);

        let window_start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        let result = run_dedupe(&storage, "t1", window_start, window_end, 500, 30, 0.99).unwrap();

        assert_eq!(result.matches, 0);
        assert_eq!(result.deduped, 0);
    }
}
