//! LLM Router & Embedding Client (§4.3 in §2's component list; contract in
//! §6) — tier-aware model selection and the accounting each call returns.
//!
//! Only the router/model-selection contract matters to the core; concrete
//! provider SDKs are out of scope per §1. `HashEmbeddingClient` and
//! `StaticLlmRouter` are deterministic test doubles used by tests and by
//! the runner's default wiring when no real provider is configured.

mod hash_embedding;
mod static_router;

pub use hash_embedding::HashEmbeddingClient;
pub use static_router::StaticLlmRouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmResult;
use crate::model::Topic;
use crate::model::{DigestMode, JsonMap};

/// The five call purposes named in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Triage,
    Enrich,
    Embed,
    CatchupPackSelect,
    CatchupPackTier,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Triage => "triage",
            Purpose::Enrich => "enrich",
            Purpose::Embed => "embed",
            Purpose::CatchupPackSelect => "catchup_pack_select",
            Purpose::CatchupPackTier => "catchup_pack_tier",
        }
    }
}

/// `chooseModel(purpose, tier) -> { provider, model, endpoint }` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
}

/// Per-call token/credit accounting every provider call returns, regardless
/// of purpose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallAccounting {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_estimate_credits: f64,
}

/// `TriageOutput` (§4.10): the LLM's structured judgment of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageOutput {
    pub schema_version: u32,
    pub prompt_id: String,
    pub provider: String,
    pub model: String,
    /// `0..100`; normalized to `aha01` by Ranking.
    pub ai_score: u8,
    pub reason: String,
    pub is_relevant: bool,
    pub is_novel: bool,
    pub categories: Vec<String>,
    pub should_deep_summarize: bool,
    pub topic: Option<String>,
    pub one_liner: Option<String>,
}

/// Fields passed to the `triage` task prompt (§4.10).
#[derive(Debug, Clone)]
pub struct TriageCandidateFields {
    pub title: Option<String>,
    pub body_snippet: Option<String>,
    pub source_type: String,
    pub source_name: String,
    pub primary_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_end: chrono::DateTime<chrono::Utc>,
}

/// Result of one `triageCandidate` call (§6): the model choice, accounting,
/// and the structured output.
#[derive(Debug, Clone)]
pub struct TriageCallResult {
    pub choice: ModelChoice,
    pub accounting: CallAccounting,
    pub output: TriageOutput,
}

/// A short structured summary produced by the `enrich` task (§4.15).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentSummary {
    pub summary: String,
    pub bullet_points: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnrichCallResult {
    pub choice: ModelChoice,
    pub accounting: CallAccounting,
    pub summary: EnrichmentSummary,
}

/// The LLM router interface consumed by Triage and Enrichment (§6).
#[async_trait]
pub trait LlmRouter: Send + Sync {
    fn choose_model(&self, purpose: Purpose, tier: DigestMode) -> ModelChoice;

    async fn triage_candidate(
        &self,
        tier: DigestMode,
        fields: &TriageCandidateFields,
    ) -> LlmResult<TriageCallResult>;

    async fn enrich(
        &self,
        tier: DigestMode,
        fields: &TriageCandidateFields,
    ) -> LlmResult<EnrichCallResult>;
}

/// The embedding client interface consumed by the Embed stage (§6).
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Fixed output dimension for the model this client serves (e.g. 1536).
    fn dims(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Embed a batch of input strings, returning one vector per input in
    /// the same order plus call accounting. All-or-nothing per batch: a
    /// single malformed vector fails the whole call.
    async fn embed_batch(
        &self,
        tier: DigestMode,
        inputs: &[String],
    ) -> LlmResult<(Vec<Vec<f64>>, CallAccounting)>;
}

/// Build `TriageCandidateFields` metadata bag as the `meta` column on the
/// resulting `ProviderCall`, stashing small provenance blobs in a JSON
/// `meta` field rather than adding columns.
pub fn call_meta(topic: &Topic, purpose: Purpose) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert("topicId".into(), serde_json::Value::String(topic.id.clone()));
    map.insert(
        "purpose".into(),
        serde_json::Value::String(purpose.as_str().to_string()),
    );
    map
}
