//! Fair Sampling (§4.8) — stratified coverage across `(sourceType, sourceId,
//! timeBucket)` so high-volume sources don't starve quieter ones.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidates::CandidateRow;

/// Summary statistics returned alongside the sampled pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairSamplingStats {
    pub bucket_count: usize,
    pub unique_source_types: usize,
    pub unique_sources: usize,
    pub top_source_types: Vec<(String, usize)>,
    pub top_sources: Vec<(String, usize)>,
}

/// Result of [`sample_fair`].
pub struct FairSamplingResult {
    pub sampled: Vec<CandidateRow>,
    pub stats: FairSamplingStats,
}

fn bucket_count(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> usize {
    let hours = (window_end - window_start).num_seconds() as f64 / 3600.0;
    ((hours / 2.0).round() as i64).clamp(3, 12) as usize
}

fn bucket_index(candidate_at: DateTime<Utc>, window_start: DateTime<Utc>, window_ms: f64, buckets: usize) -> usize {
    if window_ms <= 0.0 {
        return 0;
    }
    let offset_ms = (candidate_at - window_start).num_milliseconds() as f64;
    let idx = (offset_ms / window_ms * buckets as f64).floor() as i64;
    idx.clamp(0, buckets as i64 - 1) as usize
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Sample down a candidate pool to at most `max_pool_size`, per §4.8.
pub fn sample_fair(
    candidates: Vec<CandidateRow>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_pool_size: usize,
) -> FairSamplingResult {
    let mut source_type_counts: HashMap<String, usize> = HashMap::new();
    let mut source_counts: HashMap<String, usize> = HashMap::new();
    for c in &candidates {
        *source_type_counts.entry(c.source_type.clone()).or_insert(0) += 1;
        *source_counts.entry(c.source_id.clone()).or_insert(0) += 1;
    }
    let unique_source_types = source_type_counts.len();
    let unique_sources = source_counts.len();

    if candidates.len() <= max_pool_size {
        let bucket_count = bucket_count(window_start, window_end);
        return FairSamplingResult {
            sampled: candidates,
            stats: FairSamplingStats {
                bucket_count,
                unique_source_types,
                unique_sources,
                top_source_types: top_n(&source_type_counts, 5),
                top_sources: top_n(&source_counts, 5),
            },
        };
    }

    let buckets = bucket_count(window_start, window_end);
    let window_ms = (window_end - window_start).num_milliseconds() as f64;

    let mut groups: HashMap<(String, String, usize), Vec<CandidateRow>> = HashMap::new();
    for c in candidates {
        let bucket = bucket_index(c.candidate_at, window_start, window_ms, buckets);
        let key = (c.source_type.clone(), c.source_id.clone(), bucket);
        groups.entry(key).or_default().push(c);
    }

    let group_count = groups.len().max(1);
    let k_per_group = ((max_pool_size as f64 / group_count as f64).ceil() as usize).max(1);

    let mut union: Vec<CandidateRow> = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            b.heuristic_score
                .partial_cmp(&a.heuristic_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        group.truncate(k_per_group);
        union.extend(group);
    }

    if union.len() > max_pool_size {
        union.sort_by(|a, b| {
            b.heuristic_score
                .partial_cmp(&a.heuristic_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        union.truncate(max_pool_size);
    }

    FairSamplingResult {
        sampled: union,
        stats: FairSamplingStats {
            bucket_count: buckets,
            unique_source_types,
            unique_sources,
            top_source_types: top_n(&source_type_counts, 5),
            top_sources: top_n(&source_counts, 5),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::candidates::CandidateRef;
    use chrono::TimeZone;

    fn candidate(id: &str, source_type: &str, source_id: &str, at: DateTime<Utc>, heuristic: f64) -> CandidateRow {
        CandidateRow {
            candidate_ref: CandidateRef::Item { content_item_id: id.to_string() },
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            candidate_at: at,
            vector: vec![1.0, 0.0],
            title: None,
            body_text: None,
            primary_url: None,
            author: None,
            member_sources: None,
            recency01: 0.5,
            engagement01: 0.5,
            heuristic_score: heuristic,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        }
    }

    /// Scenario 3 (§8): 10 candidates from sourceA (scores 0.50..0.59) and 2
    /// from sourceB (0.90, 0.85), window 2h, `maxPoolSize=6`.
    #[test]
    fn fair_sampling_includes_minority_source_type() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(2);
        let mut pool = Vec::new();
        for i in 0..10 {
            pool.push(candidate(
                &format!("a{i}"),
                "rss",
                "sourceA",
                start + chrono::Duration::minutes(i as i64 * 10),
                0.50 + i as f64 * 0.01,
            ));
        }
        pool.push(candidate("b0", "reddit", "sourceB", start, 0.90));
        pool.push(candidate("b1", "reddit", "sourceB", start, 0.85));

        let result = sample_fair(pool, start, end, 6);
        assert!(result.sampled.len() <= 6);
        assert!(result.sampled.iter().any(|c| c.source_id == "sourceB"));
    }

    #[test]
    fn pool_under_cap_returns_everything() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(2);
        let pool = vec![candidate("a", "rss", "s1", start, 0.5)];
        let result = sample_fair(pool, start, end, 10);
        assert_eq!(result.sampled.len(), 1);
    }
}
