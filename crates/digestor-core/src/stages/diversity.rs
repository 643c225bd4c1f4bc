//! Diversity Selection (§4.14) — greedy top-`maxItems` pick from the ranked
//! list with soft per-type/per-source penalties to avoid source domination.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ranking::RankedCandidate;

/// Summary statistics returned alongside the selected set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiversityStats {
    pub output_distribution: Vec<(String, usize)>,
    pub triage_availability_limited_output: bool,
}

pub struct DiversityResult {
    pub selected: Vec<RankedCandidate>,
    pub stats: DiversityStats,
}

fn adjusted_score(score: f64, count_type: usize, count_source: usize, alpha_type: f64, alpha_source: f64) -> f64 {
    score / (1.0 + alpha_type * count_type as f64 + alpha_source * count_source as f64)
}

/// Greedily select up to `max_items` candidates from `ranked` (already
/// sorted by score per Ranking), per §4.14.
pub fn select_diverse(
    ranked: Vec<RankedCandidate>,
    max_items: usize,
    alpha_type: f64,
    alpha_source: f64,
    require_triage_data: bool,
) -> DiversityResult {
    let total_before_filter = ranked.len();
    let mut pool: Vec<RankedCandidate> = if require_triage_data {
        ranked.into_iter().filter(|r| r.row.has_triage_data()).collect()
    } else {
        ranked
    };
    let triage_availability_limited_output = require_triage_data && pool.len() < total_before_filter;

    let mut type_counts: HashMap<String, usize> = HashMap::new();
    let mut source_counts: HashMap<String, usize> = HashMap::new();
    let mut selected: Vec<RankedCandidate> = Vec::new();

    while selected.len() < max_items && !pool.is_empty() {
        let mut best_idx = 0usize;
        let mut best_adjusted = f64::NEG_INFINITY;
        for (idx, candidate) in pool.iter().enumerate() {
            let count_type = type_counts.get(&candidate.row.source_type).copied().unwrap_or(0);
            let count_source = source_counts.get(&candidate.row.source_id).copied().unwrap_or(0);
            let adjusted = adjusted_score(candidate.score, count_type, count_source, alpha_type, alpha_source);
            if adjusted > best_adjusted {
                best_adjusted = adjusted;
                best_idx = idx;
            }
        }

        let chosen = pool.remove(best_idx);
        *type_counts.entry(chosen.row.source_type.clone()).or_insert(0) += 1;
        *source_counts.entry(chosen.row.source_id.clone()).or_insert(0) += 1;
        if let Some(member_sources) = &chosen.row.member_sources {
            for source_id in member_sources {
                *source_counts.entry(source_id.clone()).or_insert(0) += 1;
            }
        }
        selected.push(chosen);
    }

    let mut distribution: HashMap<String, usize> = HashMap::new();
    for candidate in &selected {
        *distribution.entry(candidate.row.source_type.clone()).or_insert(0) += 1;
    }
    let mut output_distribution: Vec<(String, usize)> = distribution.into_iter().collect();
    output_distribution.sort_by(|a, b| a.0.cmp(&b.0));

    DiversityResult {
        selected,
        stats: DiversityStats {
            output_distribution,
            triage_availability_limited_output,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JsonMap;
    use crate::stages::candidates::{CandidateRef, CandidateRow};
    use chrono::{TimeZone, Utc};

    fn ranked(id: &str, source_type: &str, source_id: &str, score: f64, triaged: bool) -> RankedCandidate {
        let triage = if triaged {
            Some(crate::llm::TriageOutput {
                schema_version: 1,
                prompt_id: "p".into(),
                provider: "static".into(),
                model: "static".into(),
                ai_score: 80,
                reason: "ok".into(),
                is_relevant: true,
                is_novel: true,
                categories: vec![],
                should_deep_summarize: false,
                topic: None,
                one_liner: None,
            })
        } else {
            None
        };
        RankedCandidate {
            row: CandidateRow {
                candidate_ref: CandidateRef::Item { content_item_id: id.to_string() },
                source_type: source_type.to_string(),
                source_id: source_id.to_string(),
                candidate_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                vector: vec![1.0, 0.0],
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
                triage,
            },
            score,
            triage_json: JsonMap::new(),
        }
    }

    /// Scenario 5 (§8): a1=0.95,a2=0.90,a3=0.85 (sourceA), b1=0.80 (sourceB),
    /// maxItems=3, alphaType=0.15. §8 states the *score-descending* output
    /// set as `[a1, a2, b1]`, but `select_diverse` returns candidates in
    /// greedy-selection order: after `a1` is picked, `a2`'s adjusted score
    /// (0.90/1.15 ≈ 0.78) loses to `b1`'s (0.80/1.0 = 0.80), so the true
    /// selection order is `[a1, b1, a2]`. What the spec actually requires —
    /// `b1` surfaces and `a3` is pushed out by the type penalty — holds
    /// either way.
    #[test]
    fn type_penalty_surfaces_minority_source() {
        let ranked_list = vec![
            ranked("a1", "rss", "sourceA", 0.95, true),
            ranked("a2", "rss", "sourceA", 0.90, true),
            ranked("a3", "rss", "sourceA", 0.85, true),
            ranked("b1", "reddit", "sourceB", 0.80, true),
        ];
        let result = select_diverse(ranked_list, 3, 0.15, 0.05, true);
        let ids: Vec<String> = result.selected.iter().map(|r| r.row.candidate_id()).collect();
        assert_eq!(ids, vec!["item:a1", "item:b1", "item:a2"]);
        assert!(!ids.contains(&"item:a3".to_string()));
    }

    /// With `require_triage_data = true`, no non-triaged candidate survives.
    #[test]
    fn excludes_non_triaged_when_required() {
        let ranked_list = vec![ranked("a", "rss", "s1", 0.9, false), ranked("b", "rss", "s1", 0.5, true)];
        let result = select_diverse(ranked_list, 5, 0.15, 0.05, true);
        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].row.candidate_id(), "item:b");
        assert!(result.stats.triage_availability_limited_output);
    }
}
