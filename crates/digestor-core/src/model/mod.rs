//! Entity types shared by the storage gateway and every pipeline stage.
//!
//! Every entity here round-trips through `serde` as `camelCase` JSON, the
//! same convention the storage gateway uses for its SQLite `TEXT` JSON
//! columns (`config`, `metadata`, `raw`, `triage_json`, ...).

mod accounting;
mod cluster;
mod content_item;
mod digest;
mod embedding;
mod preference;
mod source;
mod topic;
mod user;

pub use accounting::{BudgetPeriod, CallStatus, FetchRunStatus, FetchRunCounts, FetchRun, BudgetReset, ProviderCall};
pub use cluster::{Cluster, ClusterItem};
pub use content_item::{ContentItem, ContentItemDraft, ContentItemSource};
pub use digest::{Digest, DigestItem};
pub use embedding::Embedding;
pub use preference::{FeedbackAction, FeedbackEvent, Polarity, TopicPreferenceProfile};
pub use source::Source;
pub use topic::{DigestMode, Topic};
pub use user::User;

/// A JSON object used for the loosely-typed `config`/`metadata`/`raw` columns.
///
/// The source schema treats these as "a mapping from string keys to JSON
/// values, unknown keys ignored" (see `SPEC_FULL.md` §9) rather than a fixed
/// struct, so we keep them as `serde_json::Map` end to end instead of parsing
/// into ad-hoc structs that would need to track every provider's quirks.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A dense embedding vector. Stored and compared as 64-bit floats per
/// `SPEC_FULL.md` §6 ("all entries finite 64-bit floats").
pub type Vector = Vec<f64>;
