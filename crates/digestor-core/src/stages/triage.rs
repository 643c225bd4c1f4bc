//! Triage (§4.10) — invokes the LLM `triage` task for each allocated
//! candidate, in order, recording one `ProviderCall` per attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::llm::{call_meta, LlmRouter, Purpose, TriageCandidateFields};
use crate::model::{CallStatus, JsonMap, ProviderCall, Topic};
use crate::storage::Storage;

use super::candidates::CandidateRow;

/// Counters returned by [`run_triage`], matching §7's "result struct with
/// counters" propagation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Build the topic-agnostic prompt fields for one candidate (§4.10: the
/// prompt must stay topic-agnostic so ranking remains domain-neutral).
fn fields_for(candidate: &CandidateRow, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> TriageCandidateFields {
    TriageCandidateFields {
        title: candidate.title.clone(),
        body_snippet: candidate.body_text.as_ref().map(|b| b.chars().take(400).collect()),
        source_type: candidate.source_type.clone(),
        source_name: candidate.source_id.clone(),
        primary_url: candidate.primary_url.clone(),
        author: candidate.author.clone(),
        published_at: Some(candidate.candidate_at),
        window_start,
        window_end,
    }
}

/// Run triage over an already-allocated candidate order, mutating each
/// row's `triage` field in place. Item-level failures are logged and
/// skipped (§4.10: "they do not abort the run").
pub async fn run_triage(
    candidates: &mut [CandidateRow],
    router: &dyn LlmRouter,
    storage: &Storage,
    user_id: &str,
    topic: &Topic,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> StorageResult<TriageResult> {
    let mut result = TriageResult::default();

    for candidate in candidates.iter_mut() {
        result.attempted += 1;
        let fields = fields_for(candidate, window_start, window_end);
        let started_at = Utc::now();

        match router.triage_candidate(topic.digest_mode, &fields).await {
            Ok(call_result) => {
                result.succeeded += 1;
                let provider_call = ProviderCall {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    purpose: Purpose::Triage.as_str().to_string(),
                    provider: call_result.choice.provider.clone(),
                    model: call_result.choice.model.clone(),
                    input_tokens: call_result.accounting.input_tokens,
                    output_tokens: call_result.accounting.output_tokens,
                    cost_estimate_credits: call_result.accounting.cost_estimate_credits,
                    meta: call_meta(topic, Purpose::Triage),
                    started_at,
                    ended_at: Utc::now(),
                    status: CallStatus::Ok,
                    error: None,
                };
                storage.insert_provider_call(&provider_call)?;
                candidate.triage = Some(call_result.output);
            }
            Err(err) => {
                result.failed += 1;
                let mut error_map = JsonMap::new();
                error_map.insert(
                    "message".to_string(),
                    serde_json::Value::String(err.to_string()),
                );
                let provider_call = ProviderCall {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    purpose: Purpose::Triage.as_str().to_string(),
                    provider: router.choose_model(Purpose::Triage, topic.digest_mode).provider,
                    model: router.choose_model(Purpose::Triage, topic.digest_mode).model,
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_estimate_credits: 0.0,
                    meta: call_meta(topic, Purpose::Triage),
                    started_at,
                    ended_at: Utc::now(),
                    status: CallStatus::Error,
                    error: Some(error_map),
                };
                storage.insert_provider_call(&provider_call)?;
            }
        }
    }

    Ok(result)
}
