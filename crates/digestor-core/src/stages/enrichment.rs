//! Enrichment (§4.15) — a deep-summary LLM pass over the top selected
//! candidates, up to a mode-derived cap.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::llm::{call_meta, LlmRouter, Purpose, TriageCandidateFields};
use crate::model::{CallStatus, JsonMap, ProviderCall, Topic};
use crate::storage::Storage;

use super::ranking::RankedCandidate;

/// Counters returned by [`run_enrichment`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

fn fields_for(candidate: &RankedCandidate, window_start: chrono::DateTime<Utc>, window_end: chrono::DateTime<Utc>) -> TriageCandidateFields {
    TriageCandidateFields {
        title: candidate.row.title.clone(),
        body_snippet: candidate.row.body_text.as_ref().map(|b| b.chars().take(400).collect()),
        source_type: candidate.row.source_type.clone(),
        source_name: candidate.row.source_id.clone(),
        primary_url: candidate.row.primary_url.clone(),
        author: candidate.row.author.clone(),
        published_at: Some(candidate.row.candidate_at),
        window_start,
        window_end,
    }
}

/// Call `enrich` for the first `cap` selected candidates eligible for a deep
/// summary (`should_deep_summarize` on their triage output), attaching the
/// resulting `summaryJson` in place. `summaries` is keyed by candidate id.
pub async fn run_enrichment(
    selected: &[RankedCandidate],
    cap: usize,
    router: &dyn LlmRouter,
    storage: &Storage,
    user_id: &str,
    topic: &Topic,
    window_start: chrono::DateTime<Utc>,
    window_end: chrono::DateTime<Utc>,
) -> StorageResult<(EnrichmentResult, Vec<(String, JsonMap)>)> {
    let mut result = EnrichmentResult::default();
    let mut summaries = Vec::new();

    let eligible = selected
        .iter()
        .filter(|c| c.row.triage.as_ref().is_some_and(|t| t.should_deep_summarize))
        .take(cap);

    for candidate in eligible {
        result.attempted += 1;
        let fields = fields_for(candidate, window_start, window_end);
        let started_at = Utc::now();

        match router.enrich(topic.digest_mode, &fields).await {
            Ok(call_result) => {
                result.succeeded += 1;
                let provider_call = ProviderCall {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    purpose: Purpose::Enrich.as_str().to_string(),
                    provider: call_result.choice.provider.clone(),
                    model: call_result.choice.model.clone(),
                    input_tokens: call_result.accounting.input_tokens,
                    output_tokens: call_result.accounting.output_tokens,
                    cost_estimate_credits: call_result.accounting.cost_estimate_credits,
                    meta: call_meta(topic, Purpose::Enrich),
                    started_at,
                    ended_at: Utc::now(),
                    status: CallStatus::Ok,
                    error: None,
                };
                storage.insert_provider_call(&provider_call)?;

                let summary_json = serde_json::to_value(&call_result.summary)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                summaries.push((candidate.row.candidate_id(), summary_json));
            }
            Err(err) => {
                result.failed += 1;
                let mut error_map = JsonMap::new();
                error_map.insert("message".to_string(), serde_json::Value::String(err.to_string()));
                let provider_call = ProviderCall {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    purpose: Purpose::Enrich.as_str().to_string(),
                    provider: router.choose_model(Purpose::Enrich, topic.digest_mode).provider,
                    model: router.choose_model(Purpose::Enrich, topic.digest_mode).model,
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_estimate_credits: 0.0,
                    meta: call_meta(topic, Purpose::Enrich),
                    started_at,
                    ended_at: Utc::now(),
                    status: CallStatus::Error,
                    error: Some(error_map),
                };
                storage.insert_provider_call(&provider_call)?;
            }
        }
    }

    Ok((result, summaries))
}
