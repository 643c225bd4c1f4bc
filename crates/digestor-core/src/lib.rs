//! # Digestor Core
//!
//! A personalized content aggregation and ranking pipeline engine.
//!
//! Digestor turns a set of per-topic, per-user content sources (RSS feeds,
//! subreddits, saved searches, signal bundles, ...) into ranked, deduplicated
//! digests on a schedule, respecting a monthly/daily paid-call credit budget.
//! The pipeline runs in a fixed stage sequence:
//!
//! 1. **Scheduler** ([`scheduler`]) — decides which `(topic, window)` pairs
//!    are due.
//! 2. **Budget Engine** ([`budget`]) — decides whether paid provider calls
//!    are allowed for a run.
//! 3. **Ingest** → **Embed** → **Dedupe** → **Cluster** ([`stages`]) — always
//!    run, regardless of budget (paid connectors self-gate).
//! 4. **Candidate Assembly** → **Novelty** → **Signal Corroboration** →
//!    **Fair Sampling** → **Triage Allocation** → **Triage** → **Ranking** →
//!    **Diversity Selection** → **Enrichment** → **Digest Writer**
//!    ([`stages`]) — run only when the budget allows paid calls.
//!
//! [`pipeline::PipelineRunner`] composes all of the above for one topic/
//! window at a time; [`storage::Storage`] is the single SQLite-backed
//! persistence gateway behind every stage.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use digestor_core::config::PipelineConfig;
//! use digestor_core::connector::ConnectorRegistry;
//! use digestor_core::llm::{HashEmbeddingClient, StaticLlmRouter};
//! use digestor_core::pipeline::PipelineRunner;
//! use digestor_core::storage::Storage;
//!
//! let storage = Storage::open_in_memory()?;
//! let registry = ConnectorRegistry::new();
//! let router = StaticLlmRouter::default();
//! let embedder = HashEmbeddingClient::new(8);
//! let config = PipelineConfig::from_env();
//!
//! let runner = PipelineRunner::new(&storage, &registry, &router, &embedder, &config);
//! ```

pub mod budget;
pub mod config;
pub mod connector;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod storage;
pub mod url_canon;
pub mod vector;

pub use budget::{BudgetEngine, CreditsStatus, SqliteBudgetEngine, WarningLevel};
pub use config::PipelineConfig;
pub use error::{ConnectorError, LlmError, PipelineError, PipelineResult, StorageError, StorageResult};
pub use feedback::record_feedback;
pub use pipeline::{PipelineRunner, RunResult};
pub use scheduler::{due_windows, DueWindow};
pub use storage::Storage;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::budget::{BudgetEngine, CreditsStatus, SqliteBudgetEngine};
    pub use crate::config::PipelineConfig;
    pub use crate::connector::{Connector, ConnectorRegistry};
    pub use crate::error::{PipelineError, PipelineResult};
    pub use crate::llm::{EmbeddingClient, LlmRouter};
    pub use crate::model::{ContentItem, DigestMode, Source, Topic, User};
    pub use crate::pipeline::{PipelineRunner, RunResult};
    pub use crate::scheduler::{due_windows, DueWindow};
    pub use crate::storage::Storage;
}
