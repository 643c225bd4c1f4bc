//! Triage Allocation (§4.9) — splits a bounded `maxTriageCalls` budget into
//! an exploration phase (fair coverage) and an exploitation phase (global
//! top by heuristic score).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::candidates::CandidateRow;

/// Summary statistics returned alongside the allocated order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageAllocationStats {
    pub exploration_count: usize,
    pub exploitation_count: usize,
    pub exploration_source_types: Vec<String>,
}

pub struct TriageAllocationResult {
    pub order: Vec<CandidateRow>,
    pub stats: TriageAllocationStats,
}

fn sort_by_heuristic_desc(rows: &mut [CandidateRow]) {
    rows.sort_by(|a, b| {
        b.heuristic_score
            .partial_cmp(&a.heuristic_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Allocate the triage call budget across a candidate pool, per §4.9.
pub fn allocate_triage(
    mut candidates: Vec<CandidateRow>,
    max_triage_calls: usize,
    exploration_fraction: f64,
) -> TriageAllocationResult {
    if candidates.len() <= max_triage_calls {
        sort_by_heuristic_desc(&mut candidates);
        let exploration_source_types: Vec<String> = candidates
            .iter()
            .map(|c| c.source_type.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let count = candidates.len();
        return TriageAllocationResult {
            order: candidates,
            stats: TriageAllocationStats {
                exploration_count: count,
                exploitation_count: 0,
                exploration_source_types,
            },
        };
    }

    let exploration_budget = ((max_triage_calls as f64 * exploration_fraction).floor() as usize).max(1);
    let exploitation_budget = max_triage_calls.saturating_sub(exploration_budget);

    let mut by_type: HashMap<String, Vec<CandidateRow>> = HashMap::new();
    for c in candidates {
        by_type.entry(c.source_type.clone()).or_default().push(c);
    }
    let num_types = by_type.len().max(1);
    let base_per_type = (exploration_budget / num_types).max(2);

    let mut exploration: Vec<CandidateRow> = Vec::new();
    let mut exploration_ids = std::collections::HashSet::new();
    let mut exploration_source_types = std::collections::BTreeSet::new();

    for (source_type, rows) in by_type.iter_mut() {
        let mut by_source: HashMap<String, Vec<CandidateRow>> =
            HashMap::new();
        let drained: Vec<CandidateRow> = rows.drain(..).collect();
        for row in drained {
            by_source.entry(row.source_id.clone()).or_default().push(row);
        }
        let num_sources = by_source.len().max(1);
        let base_per_source = (base_per_type / num_sources).max(1);

        let mut picked_for_type = 0usize;
        let mut source_keys: Vec<String> = by_source.keys().cloned().collect();
        source_keys.sort();
        for source_id in source_keys {
            if picked_for_type >= base_per_type {
                break;
            }
            let mut rows = by_source.remove(&source_id).unwrap();
            sort_by_heuristic_desc(&mut rows);
            let take = base_per_source.min(base_per_type - picked_for_type);
            for row in rows.into_iter().take(take) {
                exploration_ids.insert(row.candidate_id());
                exploration_source_types.insert(source_type.clone());
                exploration.push(row);
                picked_for_type += 1;
            }
        }
    }

    sort_by_heuristic_desc(&mut exploration);
    if exploration.len() > exploration_budget {
        exploration.truncate(exploration_budget);
    }

    let mut remainder: Vec<CandidateRow> = by_type
        .into_values()
        .flatten()
        .filter(|c| !exploration_ids.contains(&c.candidate_id()))
        .collect();
    sort_by_heuristic_desc(&mut remainder);
    let exploitation: Vec<CandidateRow> = remainder.into_iter().take(exploitation_budget).collect();

    let exploration_count = exploration.len();
    let exploitation_count = exploitation.len();

    let mut order = exploration;
    order.extend(exploitation);

    TriageAllocationResult {
        order,
        stats: TriageAllocationStats {
            exploration_count,
            exploitation_count,
            exploration_source_types: exploration_source_types.into_iter().collect(),
        },
    }
}
