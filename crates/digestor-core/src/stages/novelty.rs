//! Novelty (§4.12) — how unlike a candidate is compared to recent topic
//! history, via nearest-neighbor lookback.

use crate::vector::CandidateVectorIndex;

use super::candidates::CandidateRow;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Compute `novelty01` for every candidate against a lookback index of
/// `(content_item_id, vector)` pairs drawn from `[window_start -
/// lookback_days, window_start)`, mutating each row's `novelty01` field.
pub fn compute_novelty(candidates: &mut [CandidateRow], lookback: &[(String, Vec<f64>)]) {
    let entries: Vec<(&str, &[f64])> = lookback.iter().map(|(id, v)| (id.as_str(), v.as_slice())).collect();
    let index = CandidateVectorIndex::new(entries);

    for candidate in candidates.iter_mut() {
        let max_similarity = index.nearest(&candidate.vector).map(|n| n.similarity).unwrap_or(0.0);
        candidate.novelty01 = Some(clamp01(1.0 - max_similarity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::candidates::CandidateRef;
    use chrono::{TimeZone, Utc};

    fn candidate(vector: Vec<f64>) -> CandidateRow {
        CandidateRow {
            candidate_ref: CandidateRef::Item { content_item_id: "a".into() },
            source_type: "rss".into(),
            source_id: "s1".into(),
            candidate_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            vector,
            title: None,
            body_text: None,
            primary_url: None,
            author: None,
            member_sources: None,
            recency01: 0.5,
            engagement01: 0.5,
            heuristic_score: 0.5,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        }
    }

    #[test]
    fn identical_to_history_is_not_novel() {
        let mut candidates = vec![candidate(vec![1.0, 0.0])];
        let lookback = vec![("old".to_string(), vec![1.0, 0.0])];
        compute_novelty(&mut candidates, &lookback);
        assert!((candidates[0].novelty01.unwrap() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn no_history_is_fully_novel() {
        let mut candidates = vec![candidate(vec![1.0, 0.0])];
        compute_novelty(&mut candidates, &[]);
        assert_eq!(candidates[0].novelty01, Some(1.0));
    }
}
