//! Crate-wide error taxonomy.
//!
//! Each module boundary gets its own `thiserror` enum so callers can match
//! on the source of a failure without downcasting; `PipelineError` composes
//! the others via `#[from]`.

use thiserror::Error;

/// Errors surfaced by the storage gateway.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by a `Connector::fetch`/`normalize` call.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("unknown source type: {0}")]
    UnknownSourceType(String),
    #[error("connector transport error: {0}")]
    Transport(String),
    #[error("malformed raw item: {0}")]
    Malformed(String),
}

pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Errors surfaced by the LLM router / embedding client.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("malformed provider output: {0}")]
    Malformed(String),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("non-finite value in embedding vector")]
    NonFiniteVector,
    #[error("missing provider credentials: {0}")]
    MissingCredentials(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Run-granularity errors that abort a pipeline execution (§7 taxonomy
/// class 4: "unhandled exception in the orchestrator"). Item-level failures
/// never reach this type; they are caught, counted, and logged at the
/// stage boundary instead.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("run cancelled")]
    Cancelled,
    #[error("run deadline exceeded")]
    DeadlineExceeded,
    #[error("configuration error: {0}")]
    Config(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
