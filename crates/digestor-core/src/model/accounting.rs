use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JsonMap;

/// `BudgetReset.period` / the window a `computeCreditsStatus` call sums over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Monthly,
}

/// Outcome of a single provider call attempt, recorded regardless of success
/// so the audit log stays append-only and complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ok,
    Error,
}

/// One paid or free call made against an LLM or embedding provider.
///
/// Append-only: never updated or deleted after insert. The budget engine
/// sums `cost_estimate_credits` of `Ok` rows directly from this table rather
/// than maintaining a running counter, so historical accounting can never
/// drift from what was actually spent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    pub id: String,
    pub user_id: String,
    /// `"triage" | "enrich" | "embed" | "catchup_pack_select" | "catchup_pack_tier"`.
    pub purpose: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_estimate_credits: f64,
    pub meta: JsonMap,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: CallStatus,
    pub error: Option<JsonMap>,
}

/// A manual or scheduled credit reset, offset against `ProviderCall` sums
/// when computing used/remaining credits for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReset {
    pub id: String,
    pub user_id: String,
    pub period: BudgetPeriod,
    pub credits_at_reset: f64,
    pub reset_at: DateTime<Utc>,
}

/// Terminal status of a single `FetchRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchRunStatus {
    Ok,
    Partial,
    Error,
    Skipped,
}

/// Item-level counters for one ingest attempt against one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRunCounts {
    pub fetched: u64,
    pub normalized: u64,
    pub upserted: u64,
    pub errors: u64,
}

/// One ingest attempt against one `Source`, opened before the connector is
/// called and finalized exactly once with a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRun {
    pub id: String,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<FetchRunStatus>,
    pub cursor_in: JsonMap,
    pub cursor_out: Option<JsonMap>,
    pub counts: FetchRunCounts,
    pub error: Option<String>,
}
