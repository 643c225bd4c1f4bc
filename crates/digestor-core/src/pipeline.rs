//! Pipeline Runner (§4.17) — ties the stage sequence together for one
//! `(topic, window)` run: Budget Engine gate first, then Ingest, Embed,
//! Dedupe, and Cluster unconditionally, then — only if paid provider calls
//! are allowed this run — the downstream digest sub-stages through Digest
//! Writer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetEngine, CreditsStatus, SqliteBudgetEngine};
use crate::config::PipelineConfig;
use crate::connector::ConnectorRegistry;
use crate::error::PipelineResult;
use crate::llm::{EmbeddingClient, LlmRouter};
use crate::model::{DigestMode, JsonMap, Topic};
use crate::stages::{
    allocate_triage, apply_signal_corroboration, assemble_candidates, build_signal_hash_set,
    compute_novelty, derive_user_preference_weights, rank_candidates, run_cluster, run_dedupe,
    run_embed, run_enrichment, run_ingest, run_triage, sample_fair, select_diverse, write_digest,
    ClusterCandidateInput, ClusterResult, DedupeResult, DiversityStats, EmbedResult,
    EnrichmentResult, FairSamplingStats, IngestResult, RankingInputs, TriageAllocationStats,
    TriageResult,
};
use crate::storage::Storage;

/// Outcome of one [`PipelineRunner::run_window`] call: every stage's
/// counters, the resolved tier, and whether a digest was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub tier: DigestMode,
    pub credits_status: CreditsStatus,
    pub ingest: IngestResult,
    pub embed: EmbedResult,
    pub dedupe: DedupeResult,
    pub cluster: ClusterResult,
    pub fair_sampling: Option<FairSamplingStats>,
    pub triage_allocation: Option<TriageAllocationStats>,
    pub triage: Option<TriageResult>,
    pub diversity: Option<DiversityStats>,
    pub enrichment: Option<EnrichmentResult>,
    pub digest_id: Option<String>,
    /// Set when the run stopped short of the digest sub-stages because the
    /// Budget Engine reported no paid calls allowed (§9 Open Question: the
    /// cursor is also left unadvanced in this case).
    pub digest_skipped_due_to_credits: bool,
}

/// Drives the full stage sequence for one topic/window, borrowing its
/// collaborators for the duration of a run rather than owning or
/// re-resolving them per call.
pub struct PipelineRunner<'a> {
    pub storage: &'a Storage,
    pub registry: &'a ConnectorRegistry,
    pub llm_router: &'a dyn LlmRouter,
    pub embedding_client: &'a dyn EmbeddingClient,
    pub config: &'a PipelineConfig,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        storage: &'a Storage,
        registry: &'a ConnectorRegistry,
        llm_router: &'a dyn LlmRouter,
        embedding_client: &'a dyn EmbeddingClient,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            llm_router,
            embedding_client,
            config,
        }
    }

    /// Run one `(topic, window)` per §4.17's stage order and budget gate.
    pub async fn run_window(
        &self,
        topic: &Topic,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PipelineResult<RunResult> {
        let now = Utc::now();
        let budget_engine = SqliteBudgetEngine::new(self.storage);
        let credits_status = budget_engine
            .compute_credits_status(
                &topic.user_id,
                self.config.budget.monthly_credits,
                self.config.budget.daily_throttle_credits,
                now,
            )
            .await?;

        // A run with no paid budget remaining is clamped to `low` regardless
        // of the topic's configured mode.
        let tier = if credits_status.paid_calls_allowed {
            topic.digest_mode
        } else {
            DigestMode::Low
        };

        let ingest = run_ingest(
            self.storage,
            &topic.user_id,
            &topic.id,
            self.registry,
            credits_status.paid_calls_allowed,
            window_start,
            window_end,
            self.config.ingest.max_items_per_source,
        )
        .await?;

        let embed = run_embed(
            self.storage,
            self.embedding_client,
            &topic.user_id,
            topic,
            Some((window_start, window_end)),
            tier,
            &self.config.embed,
        )
        .await?;

        let dedupe = run_dedupe(
            self.storage,
            &topic.id,
            window_start,
            window_end,
            self.config.dedupe.max_items,
            self.config.dedupe.lookback_days,
            self.config.dedupe.similarity_threshold,
        )?;

        let cluster = run_cluster(
            self.storage,
            &topic.user_id,
            &topic.id,
            window_start,
            window_end,
            self.config.cluster.max_items,
            self.config.cluster.cluster_lookback_days,
            self.config.cluster.similarity_threshold,
            self.config.cluster.update_centroid,
        )?;

        let mut result = RunResult {
            tier,
            credits_status,
            ingest,
            embed,
            dedupe,
            cluster,
            fair_sampling: None,
            triage_allocation: None,
            triage: None,
            diversity: None,
            enrichment: None,
            digest_id: None,
            digest_skipped_due_to_credits: false,
        };

        if !credits_status.paid_calls_allowed {
            result.digest_skipped_due_to_credits = true;
            return Ok(result);
        }

        let clusters = self.load_cluster_candidates(&topic.id, window_start, window_end)?;
        let items = self
            .storage
            .unclustered_items_in_window(&topic.id, window_start, window_end, self.config.cluster.max_items)?
            .into_iter()
            .filter_map(|(item, embedding)| embedding.map(|e| (item, e)))
            .collect();
        let preference = self.storage.get_preference_profile(&topic.user_id, &topic.id)?;

        let mut candidates = assemble_candidates(clusters, items, preference.as_ref(), window_start, window_end);

        if candidates.is_empty() {
            // A successful run with paid calls allowed but nothing to
            // digest still advances the cursor.
            self.storage.advance_topic_cursor(&topic.id, window_end)?;
            return Ok(result);
        }

        let lookback_start = window_start - chrono::Duration::days(self.config.novelty.lookback_days);
        let lookback = self.storage.embeddings_for_topic_in_range(&topic.id, lookback_start, window_start)?;
        compute_novelty(&mut candidates, &lookback);

        if self.config.signal_corroboration.enabled {
            let bundles = self.storage.signal_bundles_in_window(&topic.id, window_start, window_end)?;
            let hashes = build_signal_hash_set(&bundles);
            apply_signal_corroboration(&mut candidates, &hashes);
        }

        let fair_sampling = sample_fair(
            candidates,
            window_start,
            window_end,
            self.config.fair_sampling.max_pool_size,
        );
        result.fair_sampling = Some(fair_sampling.stats);

        let allocation = allocate_triage(
            fair_sampling.sampled,
            self.config.triage_allocation.max_triage_calls,
            self.config.triage_allocation.exploration_fraction,
        );
        result.triage_allocation = Some(allocation.stats);

        let mut ordered = allocation.order;
        let triage = run_triage(
            &mut ordered,
            self.llm_router,
            self.storage,
            &topic.user_id,
            topic,
            window_start,
            window_end,
        )
        .await?;
        result.triage = Some(triage);

        let feedback_since = window_start - chrono::Duration::days(self.config.novelty.lookback_days);
        let feedback = self.storage.recent_feedback_with_context(&topic.id, feedback_since)?;
        let user_preference = derive_user_preference_weights(&feedback);

        let ranking_inputs = RankingInputs {
            weights: self.config.ranking_weights,
            source_type_default_weight: self.config.source_type_weights.clone(),
            user_preference,
            source_calibration_offset: None,
            decay_hours: topic.decay_hours,
            now,
        };
        let ranked = rank_candidates(ordered, &ranking_inputs);

        let diversity = select_diverse(
            ranked,
            topic.digest_depth as usize,
            self.config.diversity.alpha_type,
            self.config.diversity.alpha_source,
            true,
        );
        result.diversity = Some(diversity.stats);

        let cap = PipelineConfig::enrichment_cap(tier);
        let (enrichment, summaries) = run_enrichment(
            &diversity.selected,
            cap,
            self.llm_router,
            self.storage,
            &topic.user_id,
            topic,
            window_start,
            window_end,
        )
        .await?;
        result.enrichment = Some(enrichment);

        let summaries: HashMap<String, JsonMap> = summaries.into_iter().collect();
        let digest_id = write_digest(
            self.storage,
            &topic.user_id,
            &topic.id,
            window_start,
            window_end,
            tier,
            &diversity.selected,
            &summaries,
        )?;
        result.digest_id = Some(digest_id);

        self.storage.advance_topic_cursor(&topic.id, window_end)?;

        Ok(result)
    }

    fn load_cluster_candidates(
        &self,
        topic_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PipelineResult<Vec<ClusterCandidateInput>> {
        let clusters = self.storage.clusters_with_members_in_window(topic_id, window_start, window_end)?;
        clusters
            .into_iter()
            .map(|cluster| {
                let in_window_members = self.storage.cluster_members_in_window(&cluster.id, window_start, window_end)?;
                let member_sources = self.storage.cluster_member_sources(&cluster.id)?;
                Ok(ClusterCandidateInput {
                    cluster_id: cluster.id,
                    centroid_vector: cluster.centroid_vector,
                    in_window_members,
                    member_sources,
                })
            })
            .collect()
    }
}
