//! The digest-pipeline stage sequence (§2, §4.3–§4.16): one module per
//! stage, composed by `PipelineRunner`.
//!
//! Ingest/Embed/Dedupe/Cluster talk to the storage gateway directly; the
//! digest sub-stages (candidate assembly through diversity selection) are
//! pure functions over `CandidateRow` so `PipelineRunner` is the only place
//! that threads storage, the LLM router, and wall-clock `now` together.

pub mod candidates;
pub mod cluster;
pub mod dedupe;
pub mod digest_writer;
pub mod diversity;
pub mod embed;
pub mod enrichment;
pub mod fair_sampling;
pub mod ingest;
pub mod novelty;
pub mod ranking;
pub mod signal;
pub mod triage;
pub mod triage_allocation;

pub use candidates::{assemble_candidates, CandidateRef, CandidateRow, ClusterCandidateInput};
pub use cluster::{run_cluster, ClusterResult};
pub use dedupe::{run_dedupe, DedupeResult};
pub use digest_writer::write_digest;
pub use diversity::{select_diverse, DiversityResult, DiversityStats};
pub use embed::{run_embed, EmbedResult};
pub use enrichment::{run_enrichment, EnrichmentResult};
pub use fair_sampling::{sample_fair, FairSamplingResult, FairSamplingStats};
pub use ingest::{run_ingest, IngestResult, SourceIngestResult, StageError};
pub use novelty::compute_novelty;
pub use ranking::{derive_user_preference_weights, rank_candidates, RankedCandidate, RankingInputs, UserPreferenceWeights};
pub use signal::{apply_signal_corroboration, build_signal_hash_set};
pub use triage::{run_triage, TriageResult};
pub use triage_allocation::{allocate_triage, TriageAllocationResult, TriageAllocationStats};
