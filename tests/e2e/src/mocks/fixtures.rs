//! Candidate Pool Factory
//!
//! Builds `CandidateRow`s directly, bypassing storage, so the pure-function
//! stages (Fair Sampling, Triage Allocation, Diversity Selection, Ranking)
//! can be exercised with exact, spec-chosen feature values instead of
//! relying on heuristic derivation from a seeded database.

use chrono::{DateTime, Utc};
use digestor_core::stages::{CandidateRef, CandidateRow};

/// Factory for building `CandidateRow`s with a fluent, scenario-oriented API.
pub struct CandidateFactory;

impl CandidateFactory {
    /// A candidate with a given heuristic score, source type/id, and time.
    pub fn item(
        id: &str,
        source_type: &str,
        source_id: &str,
        heuristic_score: f64,
        candidate_at: DateTime<Utc>,
    ) -> CandidateRow {
        CandidateRow {
            candidate_ref: CandidateRef::Item { content_item_id: id.to_string() },
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            candidate_at,
            vector: vec![1.0, 0.0],
            title: Some(format!("candidate {id}")),
            body_text: None,
            primary_url: None,
            author: None,
            member_sources: None,
            recency01: 0.5,
            engagement01: 0.5,
            heuristic_score,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        }
    }

    /// Mark a candidate as already triaged, for Diversity Selection's
    /// `requireTriageData` filter.
    pub fn with_triage(mut row: CandidateRow, ai_score: u8) -> CandidateRow {
        row.triage = Some(digestor_core::llm::TriageOutput {
            schema_version: 1,
            prompt_id: "triage-v1".into(),
            provider: "static".into(),
            model: "static-triage".into(),
            ai_score,
            reason: "fixture".into(),
            is_relevant: true,
            is_novel: false,
            categories: Vec::new(),
            should_deep_summarize: false,
            topic: None,
            one_liner: None,
        });
        row
    }
}
