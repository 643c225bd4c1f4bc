//! Immutable, validated configuration records assembled from environment
//! variables.
//!
//! Per `SPEC_FULL.md` §9 Design Notes: these are plain records with
//! enumerated recognized keys. Unknown env vars are simply never read —
//! there is no reflection into field names at runtime.

use std::env;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

/// `SchedulerConfig { max_backfill_windows, min_window_seconds, lag_seconds }`
/// per §4.1, sourced from `SCHEDULER_MAX_BACKFILL_WINDOWS`,
/// `SCHEDULER_MIN_WINDOW_SECONDS`, `SCHEDULER_LAG_SECONDS`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub max_backfill_windows: usize,
    pub min_window_seconds: i64,
    pub lag_seconds: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_backfill_windows: 6,
            min_window_seconds: 60,
            lag_seconds: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            max_backfill_windows: env_usize("SCHEDULER_MAX_BACKFILL_WINDOWS", 6),
            min_window_seconds: env_i64("SCHEDULER_MIN_WINDOW_SECONDS", 60),
            lag_seconds: env_i64("SCHEDULER_LAG_SECONDS", 60),
        }
    }
}

/// §4.3 Ingest Stage limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestConfig {
    pub max_items_per_source: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_items_per_source: env_usize("INGEST_MAX_ITEMS_PER_SOURCE", 200),
        }
    }
}

/// §4.4 Embed Stage limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedConfig {
    pub max_items: usize,
    pub batch_size: usize,
    pub max_input_chars: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            max_items: env_usize("EMBED_MAX_ITEMS", 500),
            batch_size: env_usize("EMBED_BATCH_SIZE", 32),
            max_input_chars: env_usize("EMBED_MAX_INPUT_CHARS", 4000),
        }
    }
}

/// §4.5 Dedupe Stage limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupeConfig {
    pub max_items: usize,
    pub lookback_days: i64,
    pub similarity_threshold: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            max_items: env_usize("DEDUPE_MAX_ITEMS", 500),
            lookback_days: env_i64("DEDUPE_LOOKBACK_DAYS", 30),
            similarity_threshold: env_f64("DEDUPE_SIMILARITY_THRESHOLD", 0.995),
        }
    }
}

/// §4.6 Cluster Stage limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterConfig {
    pub max_items: usize,
    pub cluster_lookback_days: i64,
    pub similarity_threshold: f64,
    pub update_centroid: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_items: env_usize("CLUSTER_MAX_ITEMS", 500),
            cluster_lookback_days: env_i64("CLUSTER_LOOKBACK_DAYS", 7),
            similarity_threshold: env_f64("CLUSTER_SIMILARITY_THRESHOLD", 0.86),
            update_centroid: env_bool("CLUSTER_UPDATE_CENTROID", true),
        }
    }
}

/// §4.8 Fair Sampling inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairSamplingConfig {
    pub max_pool_size: usize,
}

impl Default for FairSamplingConfig {
    fn default() -> Self {
        Self {
            max_pool_size: env_usize("FAIR_SAMPLING_MAX_POOL_SIZE", 150),
        }
    }
}

/// §4.9 Triage Allocation inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriageAllocationConfig {
    pub max_triage_calls: usize,
    pub exploration_fraction: f64,
}

impl Default for TriageAllocationConfig {
    fn default() -> Self {
        Self {
            max_triage_calls: env_usize("OPENAI_TRIAGE_MAX_CALLS_PER_RUN", 40),
            exploration_fraction: env_f64("TRIAGE_EXPLORATION_FRACTION", 0.3),
        }
    }
}

/// §4.12 Novelty lookback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoveltyConfig {
    pub lookback_days: i64,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            lookback_days: env_i64("NOVELTY_LOOKBACK_DAYS", 30),
        }
    }
}

/// §4.13 Signal Corroboration feature flag — resolved off per
/// `SPEC_FULL.md` §9(b).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalCorroborationConfig {
    pub enabled: bool,
}

impl Default for SignalCorroborationConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("ENABLE_SIGNAL_CORROBORATION", false),
        }
    }
}

/// §4.14 Diversity Selection inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityConfig {
    pub alpha_type: f64,
    pub alpha_source: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            alpha_type: env_f64("DIVERSITY_ALPHA_TYPE", 0.15),
            alpha_source: env_f64("DIVERSITY_ALPHA_SOURCE", 0.05),
        }
    }
}

/// §4.11 Ranking formula weights (defaults exactly as listed in §4.11).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub w_aha: f64,
    pub w_heuristic: f64,
    pub w_pref: f64,
    pub w_signal: f64,
    pub w_novelty: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            w_aha: env_f64("RANKING_W_AHA", 0.8),
            w_heuristic: env_f64("RANKING_W_HEURISTIC", 0.15),
            w_pref: env_f64("RANKING_W_PREF", 0.15),
            w_signal: env_f64("RANKING_W_SIGNAL", 0.0),
            w_novelty: env_f64("RANKING_W_NOVELTY", 0.05),
        }
    }
}

/// §4.11 per-source-type default weight multiplier, sourced from the
/// `SOURCE_TYPE_WEIGHTS_JSON` env var (a JSON object mapping source type to
/// weight); unlisted types default to `1.0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceTypeWeights(std::collections::HashMap<String, f64>);

impl SourceTypeWeights {
    pub fn get(&self, source_type: &str) -> f64 {
        self.0.get(source_type).copied().unwrap_or(1.0)
    }

    pub fn from_env() -> Self {
        let raw = match env::var("SOURCE_TYPE_WEIGHTS_JSON") {
            Ok(v) => v,
            Err(_) => return Self::default(),
        };
        let parsed: std::collections::HashMap<String, f64> = serde_json::from_str(&raw).unwrap_or_default();
        Self(parsed)
    }
}

/// Budget Engine limits, consulted once per `(user, window)` run.
///
/// `compute_credits_status` takes `monthly_credits`/`daily_throttle_credits`
/// as call-site arguments rather than reading them off `User` (the `User`
/// row carries only `id`/`created_at`); this crate sources them from the
/// environment the same way every other limit in this module is sourced,
/// applying uniformly across users.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    pub monthly_credits: f64,
    pub daily_throttle_credits: Option<f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_credits: env_f64("MONTHLY_CREDITS_LIMIT", 1000.0),
            daily_throttle_credits: env::var("DAILY_THROTTLE_CREDITS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Top-level, composed configuration for one pipeline run. Assembled once
/// at `PipelineRunner` construction; never mutated mid-run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub budget: BudgetConfig,
    pub ingest: IngestConfig,
    pub embed: EmbedConfig,
    pub dedupe: DedupeConfig,
    pub cluster: ClusterConfig,
    pub fair_sampling: FairSamplingConfig,
    pub triage_allocation: TriageAllocationConfig,
    pub novelty: NoveltyConfig,
    pub signal_corroboration: SignalCorroborationConfig,
    pub diversity: DiversityConfig,
    pub ranking_weights: RankingWeights,
    pub source_type_weights: SourceTypeWeights,
    /// EMA smoothing factor applied to preference-profile updates.
    pub preference_ema_alpha: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            budget: BudgetConfig::default(),
            ingest: IngestConfig::default(),
            embed: EmbedConfig::default(),
            dedupe: DedupeConfig::default(),
            cluster: ClusterConfig::default(),
            fair_sampling: FairSamplingConfig::default(),
            triage_allocation: TriageAllocationConfig::default(),
            novelty: NoveltyConfig::default(),
            signal_corroboration: SignalCorroborationConfig::default(),
            diversity: DiversityConfig::default(),
            ranking_weights: RankingWeights::default(),
            source_type_weights: SourceTypeWeights::from_env(),
            preference_ema_alpha: env_f64("PREFERENCE_EMA_ALPHA", 0.2),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// §4.15 Enrichment cap derived from `digest_mode`. Open Question
    /// resolved in `SPEC_FULL.md` §4.15: `low -> 0, normal -> 2, high -> 5`.
    pub fn enrichment_cap(mode: crate::model::DigestMode) -> usize {
        use crate::model::DigestMode::*;
        match mode {
            Low => 0,
            Normal => 2,
            High => 5,
        }
    }
}
