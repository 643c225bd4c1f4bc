//! Ingest Stage (§4.3) — runs connectors for every enabled source of a
//! topic, normalizes and upserts the content they return, and records
//! provenance via `FetchRun`/`ContentItemSource` rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::{Connector, ConnectorRegistry, FetchParams};
use crate::error::StorageResult;
use crate::model::{CallStatus, FetchRunCounts, FetchRunStatus, JsonMap, ProviderCall, Source};
use crate::storage::Storage;

/// One item-level failure, logged with a truncated identifying id per §7's
/// "structured context... identifying ids truncated to 8 chars".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    pub id: String,
    pub message: String,
}

pub(super) fn truncate_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Outcome of ingesting one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceIngestResult {
    pub source_id: String,
    pub status: Option<String>,
    pub skip_reason: Option<String>,
    pub counts: FetchRunCounts,
    pub errors: Vec<StageError>,
}

/// Outcome of one Ingest Stage run over every enabled source of a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub sources: Vec<SourceIngestResult>,
}

impl IngestResult {
    pub fn total_fetched(&self) -> u64 {
        self.sources.iter().map(|s| s.counts.fetched).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.sources.iter().map(|s| s.counts.errors).sum()
    }
}

fn merged_cursor(next_cursor: &JsonMap, window_end: DateTime<Utc>) -> JsonMap {
    let mut merged = next_cursor.clone();
    merged.insert(
        "last_fetch_at".to_string(),
        serde_json::Value::String(window_end.to_rfc3339()),
    );
    merged
}

/// Ingest one enabled source for one window, following §4.3's protocol
/// exactly (steps 1–5).
async fn ingest_source(
    storage: &Storage,
    user_id: &str,
    source: &Source,
    connector: Option<&dyn Connector>,
    paid_calls_allowed: bool,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_items_per_source: usize,
) -> StorageResult<SourceIngestResult> {
    let started_at = Utc::now();
    let fetch_run_id = storage.open_fetch_run(&source.id, started_at, &source.cursor)?;

    let Some(connector) = connector else {
        storage.finalize_fetch_run(
            &fetch_run_id,
            Utc::now(),
            FetchRunStatus::Error,
            FetchRunCounts::default(),
            None,
            Some("no connector registered for source type"),
        )?;
        return Ok(SourceIngestResult {
            source_id: source.id.clone(),
            status: Some("error".to_string()),
            skip_reason: None,
            counts: FetchRunCounts::default(),
            errors: vec![StageError {
                id: truncate_id(&source.id),
                message: format!("unknown source type: {}", source.source_type),
            }],
        });
    };

    if connector.is_paid() && !paid_calls_allowed {
        storage.finalize_fetch_run(
            &fetch_run_id,
            Utc::now(),
            FetchRunStatus::Skipped,
            FetchRunCounts::default(),
            None,
            None,
        )?;
        return Ok(SourceIngestResult {
            source_id: source.id.clone(),
            status: Some("skipped".to_string()),
            skip_reason: Some("budget_exhausted".to_string()),
            counts: FetchRunCounts::default(),
            errors: Vec::new(),
        });
    }

    let params = FetchParams {
        source_id: source.id.clone(),
        source_type: source.source_type.clone(),
        config: source.config.clone(),
        cursor: source.cursor.clone(),
        window_start,
        window_end,
        max_items: max_items_per_source,
    };

    let fetch_result = match connector.fetch(&params).await {
        Ok(r) => r,
        Err(err) => {
            storage.finalize_fetch_run(
                &fetch_run_id,
                Utc::now(),
                FetchRunStatus::Error,
                FetchRunCounts::default(),
                None,
                Some(&err.to_string()),
            )?;
            return Ok(SourceIngestResult {
                source_id: source.id.clone(),
                status: Some("error".to_string()),
                skip_reason: None,
                counts: FetchRunCounts::default(),
                errors: vec![StageError {
                    id: truncate_id(&source.id),
                    message: err.to_string(),
                }],
            });
        }
    };

    let mut counts = FetchRunCounts {
        fetched: fetch_result.raw_items.len() as u64,
        ..Default::default()
    };
    let mut errors = Vec::new();

    for raw in &fetch_result.raw_items {
        let draft = match connector.normalize(raw, &params) {
            Ok(d) => d,
            Err(err) => {
                counts.errors += 1;
                errors.push(StageError {
                    id: truncate_id(&source.id),
                    message: err.to_string(),
                });
                continue;
            }
        };
        counts.normalized += 1;

        let fetched_at = Utc::now();
        match storage.upsert_content_item_draft_and_link(user_id, &source.id, &source.source_type, &draft, fetched_at) {
            Ok((_content_item_id, _inserted)) => {
                counts.upserted += 1;
            }
            Err(err) => {
                counts.errors += 1;
                errors.push(StageError {
                    id: truncate_id(&source.id),
                    message: err.to_string(),
                });
            }
        }
    }

    for draft in &fetch_result.provider_calls {
        let call = ProviderCall {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            purpose: crate::llm::Purpose::CatchupPackSelect.as_str().to_string(),
            provider: draft.provider.clone(),
            model: draft.model.clone(),
            input_tokens: draft.input_tokens,
            output_tokens: draft.output_tokens,
            cost_estimate_credits: draft.cost_estimate_credits,
            meta: JsonMap::new(),
            started_at,
            ended_at: Utc::now(),
            status: CallStatus::Ok,
            error: None,
        };
        storage.insert_provider_call(&call)?;
    }

    let status = if counts.errors == 0 {
        FetchRunStatus::Ok
    } else {
        FetchRunStatus::Partial
    };

    let next_cursor = merged_cursor(&fetch_result.next_cursor, window_end);
    storage.update_source_cursor(&source.id, &next_cursor)?;
    storage.finalize_fetch_run(&fetch_run_id, Utc::now(), status, counts, Some(&next_cursor), None)?;

    Ok(SourceIngestResult {
        source_id: source.id.clone(),
        status: Some(if counts.errors == 0 { "ok" } else { "partial" }.to_string()),
        skip_reason: None,
        counts,
        errors,
    })
}

/// Run Ingest for every enabled source of a topic, sequentially, per §5's
/// "sources of one run are processed sequentially to preserve per-source
/// cursor ordering".
pub async fn run_ingest(
    storage: &Storage,
    user_id: &str,
    topic_id: &str,
    registry: &ConnectorRegistry,
    paid_calls_allowed: bool,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    max_items_per_source: usize,
) -> StorageResult<IngestResult> {
    let sources = storage.list_enabled_sources(topic_id)?;
    let mut results = Vec::with_capacity(sources.len());

    for source in &sources {
        let connector = registry.get(&source.source_type);
        let result = ingest_source(
            storage,
            user_id,
            source,
            connector.as_deref(),
            paid_calls_allowed,
            window_start,
            window_end,
            max_items_per_source,
        )
        .await?;
        results.push(result);
    }

    Ok(IngestResult { sources: results })
}
