//! Ranking (§4.11) — combines every feature into the final composite score
//! and the `system_features` explainability block attached to each
//! candidate's `triage_json`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::{RankingWeights, SourceTypeWeights};
use crate::model::{FeedbackAction, JsonMap, Polarity};

use super::candidates::CandidateRow;

/// Per-user weight maps derived from recent feedback (§4.11): `sourceType ->
/// [0.5, 2.0]` and `author -> [0.5, 2.0]`. Unlisted keys default to `1.0`.
#[derive(Debug, Clone, Default)]
pub struct UserPreferenceWeights {
    pub source_type_weight: HashMap<String, f64>,
    pub author_weight: HashMap<String, f64>,
}

impl UserPreferenceWeights {
    fn source_type(&self, source_type: &str) -> f64 {
        self.source_type_weight.get(source_type).copied().unwrap_or(1.0)
    }

    fn author(&self, author: Option<&str>) -> f64 {
        author
            .and_then(|a| self.author_weight.get(a))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Derive `sourceTypeWeight`/`authorWeight` from a window of recent feedback
/// events (§4.11: "Two maps derived from recent feedback"). Each like/save
/// nudges its source type and author up, each dislike down, clamped to the
/// spec's `[0.5, 2.0]` range; keys with no feedback are simply absent and
/// fall back to the neutral `1.0` default in `source_type`/`author` above.
pub fn derive_user_preference_weights(events: &[(FeedbackAction, String, Option<String>)]) -> UserPreferenceWeights {
    let mut source_type_counts: HashMap<String, (i64, i64)> = HashMap::new();
    let mut author_counts: HashMap<String, (i64, i64)> = HashMap::new();

    for (action, source_type, author) in events {
        let polarity = action.polarity();
        let bump = |counts: &mut HashMap<String, (i64, i64)>, key: &str| {
            let entry = counts.entry(key.to_string()).or_insert((0, 0));
            match polarity {
                Some(Polarity::Positive) => entry.0 += 1,
                Some(Polarity::Negative) => entry.1 += 1,
                None => {}
            }
        };
        bump(&mut source_type_counts, source_type);
        if let Some(author) = author {
            bump(&mut author_counts, author);
        }
    }

    let weight_from_counts = |(likes, dislikes): (i64, i64)| (1.0 + 0.15 * (likes - dislikes) as f64).clamp(0.5, 2.0);

    UserPreferenceWeights {
        source_type_weight: source_type_counts.into_iter().map(|(k, v)| (k, weight_from_counts(v))).collect(),
        author_weight: author_counts.into_iter().map(|(k, v)| (k, weight_from_counts(v))).collect(),
    }
}

/// Everything Ranking needs beyond the candidate pool itself.
#[derive(Debug, Clone)]
pub struct RankingInputs {
    pub weights: RankingWeights,
    pub source_type_default_weight: SourceTypeWeights,
    pub user_preference: UserPreferenceWeights,
    /// Per-source additive correction to `aha01`, applied only when present
    /// (§4.11: "optionally corrected by a per-source calibration offset when
    /// enabled").
    pub source_calibration_offset: Option<HashMap<String, f64>>,
    pub decay_hours: Option<f64>,
    pub now: DateTime<Utc>,
}

/// A candidate after scoring, carrying the score and its explainability
/// payload ready to be written as `DigestItem.triage_json`.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub row: CandidateRow,
    pub score: f64,
    pub triage_json: JsonMap,
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn decay_factor(candidate_at: DateTime<Utc>, now: DateTime<Utc>, decay_hours: Option<f64>) -> f64 {
    match decay_hours {
        Some(hours) if hours > 0.0 => {
            let age_hours = (now - candidate_at).num_seconds() as f64 / 3600.0;
            (-age_hours.max(0.0) / hours).exp()
        }
        _ => 1.0,
    }
}

/// Rank every candidate and sort by
/// `score desc, candidate_at desc, candidate_id asc` for a total, deterministic order.
pub fn rank_candidates(candidates: Vec<CandidateRow>, inputs: &RankingInputs) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|row| score_one(row, inputs))
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.row.candidate_at.cmp(&a.row.candidate_at))
            .then_with(|| a.row.candidate_id().cmp(&b.row.candidate_id()))
    });

    ranked
}

fn score_one(row: CandidateRow, inputs: &RankingInputs) -> RankedCandidate {
    let w = &inputs.weights;

    let calibration_offset = inputs
        .source_calibration_offset
        .as_ref()
        .and_then(|map| map.get(&row.source_id).copied());

    let aha01_raw = row
        .triage
        .as_ref()
        .map(|t| t.ai_score as f64 / 100.0)
        .unwrap_or(row.heuristic_score);
    let aha01 = clamp01(aha01_raw + calibration_offset.unwrap_or(0.0));

    let pref = row.positive_sim.unwrap_or(0.0) - row.negative_sim.unwrap_or(0.0);
    let signal01 = if row.signal_matched == Some(true) { 1.0 } else { 0.0 };
    let novelty01 = row.novelty01.unwrap_or(0.0);

    let type_weight = inputs.source_type_default_weight.get(&row.source_type);
    let source_weight = row.source_weight.unwrap_or(1.0);
    let source_effective = (type_weight * source_weight).clamp(0.1, 3.0);

    let user_source_type_weight = inputs.user_preference.source_type(&row.source_type);
    let user_author_weight = inputs.user_preference.author(row.author.as_deref());
    let user_pref = (user_source_type_weight * user_author_weight).clamp(0.5, 2.0);

    let decay = decay_factor(row.candidate_at, inputs.now, inputs.decay_hours);

    let base = if row.triage.is_some() {
        w.w_aha * aha01 + w.w_heuristic * row.heuristic_score + w.w_pref * pref
    } else {
        row.heuristic_score + w.w_pref * pref
    };
    let pre_weight = base + w.w_signal * signal01 + w.w_novelty * novelty01;
    let score = pre_weight * source_effective * user_pref * decay;

    let score_debug = json!({
        "weights": {
            "wAha": w.w_aha,
            "wHeuristic": w.w_heuristic,
            "wPref": w.w_pref,
            "wSignal": w.w_signal,
            "wNovelty": w.w_novelty,
        },
        "inputs": {
            "aha01": aha01,
            "heuristicScore": row.heuristic_score,
            "pref": pref,
            "signal01": signal01,
            "novelty01": novelty01,
        },
        "components": {
            "base": base,
            "preWeight": pre_weight,
        },
        "multipliers": {
            "sourceEffective": source_effective,
            "userPref": user_pref,
            "decay": decay,
        },
        "finalScore": score,
    });

    let mut system_features = JsonMap::new();
    system_features.insert("signal_corroboration_v1".into(), json!(signal01 > 0.0));
    system_features.insert("novelty_v1".into(), json!(novelty01));
    system_features.insert("source_weight_v1".into(), json!(source_effective));
    system_features.insert("user_preference_v1".into(), json!(user_pref));
    system_features.insert("recency_decay_v1".into(), json!(decay));
    system_features.insert(
        "source_calibration_v1".into(),
        json!(calibration_offset),
    );
    system_features.insert("score_debug_v1".into(), score_debug);

    let mut triage_json = row
        .triage
        .as_ref()
        .and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    triage_json.insert("systemFeatures".into(), serde_json::Value::Object(system_features));

    RankedCandidate { row, score, triage_json }
}
