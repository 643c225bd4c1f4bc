//! Connector Registry (§4.3, §6) — lookup from source type string to a
//! `Connector` implementation.
//!
//! Only the trait and a registry matter to the core; concrete connectors
//! (Reddit, RSS, HN, X/Twitter search, ...) are out of scope per §1. The two
//! connectors shipped here (`StaticConnector`, `FlakyConnector`) exist only
//! to exercise the trait in tests and the runner's default wiring.

mod flaky;
mod r#static;

pub use flaky::FlakyConnector;
pub use r#static::StaticConnector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorResult;
use crate::model::{ContentItemDraft, JsonMap};

/// Source types considered paid; the registry consults this set so the
/// Ingest stage can skip a source under budget exhaustion without the
/// connector itself needing budget awareness. Configurable per §6 ("the
/// exact set is configurable").
pub const DEFAULT_PAID_SOURCE_TYPES: &[&str] = &["signal", "x_posts"];

/// Parameters passed to `Connector::fetch` for one source/window.
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub source_id: String,
    pub source_type: String,
    pub config: JsonMap,
    pub cursor: JsonMap,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub max_items: usize,
}

/// A raw, connector-specific payload prior to normalization.
pub type RawItem = serde_json::Value;

/// Provider-call accounting a connector's `fetch` call may report, recorded
/// by Ingest alongside the content it produced.
#[derive(Debug, Clone)]
pub struct ProviderCallDraft {
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_estimate_credits: f64,
}

/// Result of one `fetch` call.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub raw_items: Vec<RawItem>,
    pub next_cursor: JsonMap,
    pub provider_calls: Vec<ProviderCallDraft>,
}

/// The connector interface consumed by Ingest (§6).
///
/// Object-safe via `async-trait` so the registry can hold `Arc<dyn
/// Connector>` for shared, `Send + Sync` state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fetch raw items for one source/window, advancing pagination state.
    async fn fetch(&self, params: &FetchParams) -> ConnectorResult<FetchResult>;

    /// Normalize one raw item into a `ContentItemDraft` ready for upsert.
    fn normalize(&self, raw: &RawItem, params: &FetchParams) -> ConnectorResult<ContentItemDraft>;

    /// Whether this source type is a paid connector (consults budget gate).
    fn is_paid(&self) -> bool {
        false
    }
}

/// Lookup from source type string to connector, keyed exactly once per
/// type at registration time.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_type: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors.insert(source_type.into(), connector);
    }

    pub fn get(&self, source_type: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(source_type).cloned()
    }
}
