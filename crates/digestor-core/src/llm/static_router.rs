use async_trait::async_trait;

use crate::model::DigestMode;

use super::{
    CallAccounting, EnrichCallResult, EnrichmentSummary, LlmRouter, ModelChoice, Purpose,
    TriageCallResult, TriageCandidateFields, TriageOutput,
};
use crate::error::LlmResult;

/// A deterministic router/test double used by tests and the runner's
/// default wiring. `ai_score` is derived from a cheap heuristic over the
/// candidate's title length and recency rather than a real model call, so
/// tests exercising the ranking formula get stable, explainable inputs
/// without a network dependency (Non-goal: concrete LLM provider SDKs, §1).
pub struct StaticLlmRouter;

impl StaticLlmRouter {
    pub fn new() -> Self {
        Self
    }

    fn score_fields(fields: &TriageCandidateFields) -> u8 {
        let title_len = fields.title.as_deref().map(str::len).unwrap_or(0);
        let base = 40 + (title_len % 50) as i64;
        base.clamp(0, 100) as u8
    }
}

impl Default for StaticLlmRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmRouter for StaticLlmRouter {
    fn choose_model(&self, purpose: Purpose, tier: DigestMode) -> ModelChoice {
        let model = match (purpose, tier) {
            (Purpose::Triage, DigestMode::Low) => "static-triage-low",
            (Purpose::Triage, DigestMode::Normal) => "static-triage-normal",
            (Purpose::Triage, DigestMode::High) => "static-triage-high",
            (Purpose::Enrich, _) => "static-enrich",
            _ => "static-default",
        };
        ModelChoice {
            provider: "static".to_string(),
            model: model.to_string(),
            endpoint: "local://static-router".to_string(),
        }
    }

    async fn triage_candidate(
        &self,
        tier: DigestMode,
        fields: &TriageCandidateFields,
    ) -> LlmResult<TriageCallResult> {
        let choice = self.choose_model(Purpose::Triage, tier);
        let ai_score = Self::score_fields(fields);
        Ok(TriageCallResult {
            choice: choice.clone(),
            accounting: CallAccounting {
                input_tokens: 200,
                output_tokens: 60,
                cost_estimate_credits: 1.0,
            },
            output: TriageOutput {
                schema_version: 1,
                prompt_id: "static-triage-v1".to_string(),
                provider: choice.provider,
                model: choice.model,
                ai_score,
                reason: "heuristic static triage".to_string(),
                is_relevant: ai_score >= 40,
                is_novel: ai_score >= 70,
                categories: Vec::new(),
                should_deep_summarize: ai_score >= 75,
                topic: None,
                one_liner: fields.title.clone(),
            },
        })
    }

    async fn enrich(
        &self,
        tier: DigestMode,
        fields: &TriageCandidateFields,
    ) -> LlmResult<EnrichCallResult> {
        let choice = self.choose_model(Purpose::Enrich, tier);
        Ok(EnrichCallResult {
            choice,
            accounting: CallAccounting {
                input_tokens: 300,
                output_tokens: 120,
                cost_estimate_credits: 2.0,
            },
            summary: EnrichmentSummary {
                summary: fields
                    .title
                    .clone()
                    .unwrap_or_else(|| "untitled".to_string()),
                bullet_points: vec![fields.source_type.clone()],
            },
        })
    }
}
