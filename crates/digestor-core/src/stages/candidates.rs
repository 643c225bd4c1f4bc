//! Candidate Assembly (§4.7) — turns hot clusters and unclustered items for
//! one window into the pool `CandidateRow`s every downstream sub-algorithm
//! (Fair Sampling, Triage Allocation, Ranking, ...) operates over.

use chrono::{DateTime, Utc};

use crate::llm::TriageOutput;
use crate::model::{ContentItem, Embedding, JsonMap, TopicPreferenceProfile, Vector};
use crate::vector::cosine_similarity;

/// Which underlying entity a candidate represents.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateRef {
    Cluster { cluster_id: String },
    Item { content_item_id: String },
}

/// One row in the candidate pool. Every sub-algorithm from here on is a pure
/// function over a `Vec<CandidateRow>` (§4.7–§4.14 expansion note): no I/O,
/// no RNG, no wall-clock reads — callers pass `now`/window bounds in.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub candidate_ref: CandidateRef,
    pub source_type: String,
    pub source_id: String,
    pub candidate_at: DateTime<Utc>,
    pub vector: Vector,
    pub title: Option<String>,
    pub body_text: Option<String>,
    pub primary_url: Option<String>,
    pub author: Option<String>,
    /// Every distinct source a cluster's members came from; `None` for item
    /// candidates (used by Diversity Selection's per-source penalty, §4.14).
    pub member_sources: Option<Vec<String>>,
    pub recency01: f64,
    pub engagement01: f64,
    pub heuristic_score: f64,
    pub positive_sim: Option<f64>,
    pub negative_sim: Option<f64>,
    pub novelty01: Option<f64>,
    pub signal_matched: Option<bool>,
    pub source_weight: Option<f64>,
    pub triage: Option<TriageOutput>,
}

impl CandidateRow {
    /// Stable identifier used for sort tie-breaks (`candidate_id asc`) and
    /// for keying per-candidate outputs.
    pub fn candidate_id(&self) -> String {
        match &self.candidate_ref {
            CandidateRef::Cluster { cluster_id } => format!("cluster:{cluster_id}"),
            CandidateRef::Item { content_item_id } => format!("item:{content_item_id}"),
        }
    }

    pub fn has_triage_data(&self) -> bool {
        self.triage.is_some()
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn metadata_f64(map: &JsonMap, key: &str) -> Option<f64> {
    map.get(key).and_then(|v| v.as_f64())
}

fn engagement_raw(metadata: &JsonMap) -> f64 {
    let score = metadata_f64(metadata, "score")
        .or_else(|| metadata_f64(metadata, "ups"))
        .unwrap_or(0.0)
        .max(0.0);
    let comments = metadata_f64(metadata, "num_comments")
        .or_else(|| metadata_f64(metadata, "comment_count"))
        .unwrap_or(0.0)
        .max(0.0);
    score.ln_1p() + 0.25 * comments.ln_1p()
}

fn recency01(candidate_at: DateTime<Utc>, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> f64 {
    let span = (window_end - window_start).num_milliseconds() as f64;
    if span <= 0.0 {
        return 1.0;
    }
    let remaining = (window_end - candidate_at).num_milliseconds() as f64;
    clamp01(1.0 - remaining / span)
}

/// A cluster with its in-window members already loaded, ready for
/// representative selection.
pub struct ClusterCandidateInput {
    pub cluster_id: String,
    pub centroid_vector: Vector,
    pub in_window_members: Vec<ContentItem>,
    pub member_sources: Vec<String>,
}

/// Pick the in-window member used as the cluster's display representative
/// for this digest: the first with a non-null title, else the most recent.
fn pick_representative(members: &[ContentItem]) -> Option<&ContentItem> {
    members
        .iter()
        .filter(|m| m.title.is_some())
        .max_by_key(|m| m.candidate_at())
        .or_else(|| members.iter().max_by_key(|m| m.candidate_at()))
}

/// Assemble the candidate pool for one `(user, topic, window)`, per §4.7.
///
/// `items` are unclustered, topic-scoped, in-window, non-duplicate,
/// non-deleted, non-signal content items paired with their embedding.
pub fn assemble_candidates(
    clusters: Vec<ClusterCandidateInput>,
    items: Vec<(ContentItem, Embedding)>,
    preference: Option<&TopicPreferenceProfile>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<CandidateRow> {
    let mut raw_rows: Vec<(CandidateRow, f64)> = Vec::new();

    for cluster in clusters {
        let Some(representative) = pick_representative(&cluster.in_window_members) else {
            continue;
        };
        let candidate_at = cluster
            .in_window_members
            .iter()
            .map(|m| m.candidate_at())
            .max()
            .unwrap_or_else(|| representative.candidate_at());
        let raw = engagement_raw(&representative.metadata);
        let row = CandidateRow {
            candidate_ref: CandidateRef::Cluster {
                cluster_id: cluster.cluster_id,
            },
            source_type: representative.source_type.clone(),
            source_id: representative.source_id.clone(),
            candidate_at,
            vector: cluster.centroid_vector,
            title: representative.title.clone(),
            body_text: representative.body_text.clone(),
            primary_url: representative.canonical_url.clone(),
            author: representative.author.clone(),
            member_sources: Some(cluster.member_sources),
            recency01: recency01(candidate_at, window_start, window_end),
            engagement01: 0.0,
            heuristic_score: 0.0,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        };
        raw_rows.push((row, raw));
    }

    for (item, embedding) in items {
        let candidate_at = item.candidate_at();
        let raw = engagement_raw(&item.metadata);
        let row = CandidateRow {
            candidate_ref: CandidateRef::Item {
                content_item_id: item.id.clone(),
            },
            source_type: item.source_type.clone(),
            source_id: item.source_id.clone(),
            candidate_at,
            vector: embedding.vector,
            title: item.title.clone(),
            body_text: item.body_text.clone(),
            primary_url: item.canonical_url.clone(),
            author: item.author.clone(),
            member_sources: None,
            recency01: recency01(candidate_at, window_start, window_end),
            engagement01: 0.0,
            heuristic_score: 0.0,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        };
        raw_rows.push((row, raw));
    }

    let min_raw = raw_rows.iter().map(|(_, r)| *r).fold(f64::INFINITY, f64::min);
    let max_raw = raw_rows.iter().map(|(_, r)| *r).fold(f64::NEG_INFINITY, f64::max);
    let span = max_raw - min_raw;

    raw_rows
        .into_iter()
        .map(|(mut row, raw)| {
            row.engagement01 = if span > 0.0 { clamp01((raw - min_raw) / span) } else { 0.0 };
            row.heuristic_score = 0.6 * row.recency01 + 0.4 * row.engagement01;
            if let Some(profile) = preference {
                row.positive_sim = profile
                    .positive_vector
                    .as_ref()
                    .map(|v| cosine_similarity(&row.vector, v));
                row.negative_sim = profile
                    .negative_vector
                    .as_ref()
                    .map(|v| cosine_similarity(&row.vector, v));
            }
            row
        })
        .collect()
}
