//! Integration tests that drive `PipelineRunner` through a real `Storage`
//! plus registered connectors, rather than seeding content items directly.
//! These exercise the paths `digestor-core`'s own inline `#[cfg(test)]`
//! modules don't reach: Ingest via the `Connector` trait, multi-window
//! scheduler progression, and an Embed batch failure under a real client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use digestor_core::config::PipelineConfig;
use digestor_core::connector::{Connector, ConnectorRegistry, FetchParams, FetchResult, RawItem, StaticConnector};
use digestor_core::error::{ConnectorResult, LlmResult};
use digestor_core::llm::{CallAccounting, EmbeddingClient, HashEmbeddingClient, StaticLlmRouter};
use digestor_core::model::{ContentItemDraft, DigestMode, JsonMap, Source, Topic, User};
use digestor_core::pipeline::PipelineRunner;
use digestor_core::scheduler::due_windows;
use digestor_core::storage::Storage;

use digestor_e2e_tests::harness::TestDatabaseManager;

fn draft(title: &str, at: DateTime<Utc>) -> ContentItemDraft {
    ContentItemDraft {
        source_type: "rss".into(),
        external_id: Some(title.into()),
        title: Some(title.into()),
        body_text: Some(format!("body for {title}, long enough to matter for heuristics")),
        published_at: Some(at),
        ..Default::default()
    }
}

/// One Embed batch call that always returns a vector one dimension too
/// wide, so every batch fails validation (§4.4, P12: a single malformed
/// vector fails the whole batch).
struct BrokenEmbeddingClient {
    dims: usize,
}

#[async_trait]
impl EmbeddingClient for BrokenEmbeddingClient {
    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "broken-embed-v1"
    }

    async fn embed_batch(&self, _tier: DigestMode, inputs: &[String]) -> LlmResult<(Vec<Vec<f64>>, CallAccounting)> {
        let vectors = inputs.iter().map(|_| vec![0.0; self.dims + 1]).collect();
        Ok((
            vectors,
            CallAccounting {
                input_tokens: 0,
                output_tokens: 0,
                cost_estimate_credits: 0.0,
            },
        ))
    }
}

/// Wraps `StaticConnector` but reports itself as a paid connector, to drive
/// Ingest's budget-gated skip path (§4.3 step 2) end to end.
struct PaidWrapper(StaticConnector);

#[async_trait]
impl Connector for PaidWrapper {
    async fn fetch(&self, params: &FetchParams) -> ConnectorResult<FetchResult> {
        self.0.fetch(params).await
    }

    fn normalize(&self, raw: &RawItem, params: &FetchParams) -> ConnectorResult<ContentItemDraft> {
        self.0.normalize(raw, params)
    }

    fn is_paid(&self) -> bool {
        true
    }
}

fn base_topic(mode: DigestMode) -> Topic {
    Topic {
        id: "t1".into(),
        user_id: "u1".into(),
        name: "rust-news".into(),
        digest_schedule_enabled: true,
        digest_interval_minutes: 60,
        digest_mode: mode,
        digest_depth: 10,
        digest_cursor_end: None,
        decay_hours: None,
    }
}

#[tokio::test]
async fn ingest_through_digest_with_a_real_connector() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    storage.upsert_user(&User::new("u1")).unwrap();
    let topic = base_topic(DigestMode::Normal);
    storage.upsert_topic(&topic).unwrap();
    storage
        .upsert_source(&Source {
            id: "s1".into(),
            user_id: "u1".into(),
            topic_id: "t1".into(),
            source_type: "rss".into(),
            name: "feed".into(),
            config: Default::default(),
            cursor: Default::default(),
            is_enabled: true,
            weight: None,
        })
        .unwrap();

    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::hours(1);

    let connector = Arc::new(StaticConnector::new(vec![
        draft("alpha launches v2", start + chrono::Duration::minutes(10)),
        draft("beta gets a rewrite", start + chrono::Duration::minutes(40)),
    ]));
    let mut registry = ConnectorRegistry::new();
    registry.register("rss", connector);

    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(16);
    let config = PipelineConfig::default();

    let runner = PipelineRunner::new(storage, &registry, &router, &embedder, &config);
    let result = runner.run_window(&topic, start, end).await.unwrap();

    assert_eq!(result.ingest.total_fetched(), 2);
    assert_eq!(result.embed.embedded, 2);
    let digest_id = result.digest_id.expect("digest should be written");
    let items = storage.get_digest_items(&digest_id).unwrap();
    assert!(!items.is_empty());
    assert_eq!(storage.get_topic("t1").unwrap().unwrap().digest_cursor_end, Some(end));
}

#[tokio::test]
async fn paid_connector_is_skipped_when_budget_is_exhausted() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    storage.upsert_user(&User::new("u1")).unwrap();
    let topic = base_topic(DigestMode::High);
    storage.upsert_topic(&topic).unwrap();
    storage
        .upsert_source(&Source {
            id: "s1".into(),
            user_id: "u1".into(),
            topic_id: "t1".into(),
            source_type: "signal".into(),
            name: "signal search".into(),
            config: Default::default(),
            cursor: Default::default(),
            is_enabled: true,
            weight: None,
        })
        .unwrap();

    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::hours(1);

    // Blow past the default monthly limit (1000 credits) before the run.
    storage
        .insert_provider_call(&digestor_core::model::ProviderCall {
            id: "call-1".into(),
            user_id: "u1".into(),
            purpose: "triage".into(),
            provider: "static".into(),
            model: "static-triage-high".into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_estimate_credits: 5_000.0,
            meta: JsonMap::new(),
            started_at: start,
            ended_at: start,
            status: digestor_core::model::CallStatus::Ok,
            error: None,
        })
        .unwrap();

    let connector = Arc::new(PaidWrapper(StaticConnector::new(vec![draft(
        "should be skipped",
        start + chrono::Duration::minutes(5),
    )])));
    let mut registry = ConnectorRegistry::new();
    registry.register("signal", connector);

    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(16);
    let config = PipelineConfig::default();

    let runner = PipelineRunner::new(storage, &registry, &router, &embedder, &config);
    let result = runner.run_window(&topic, start, end).await.unwrap();

    assert_eq!(result.tier, DigestMode::Low, "mode must clamp to low when budget is exhausted");
    assert_eq!(result.ingest.sources.len(), 1);
    assert_eq!(result.ingest.sources[0].skip_reason.as_deref(), Some("budget_exhausted"));
    assert_eq!(result.ingest.total_fetched(), 0);
    assert!(result.digest_skipped_due_to_credits);
    assert!(result.digest_id.is_none());

    let triage_calls = storage.count_provider_calls("u1", "triage", start - chrono::Duration::days(1)).unwrap();
    assert_eq!(triage_calls, 1, "no new triage calls beyond the pre-seeded one");
}

#[tokio::test]
async fn scheduler_driven_ticks_advance_cursor_monotonically() {
    let storage = Storage::open_in_memory().unwrap();
    storage.upsert_user(&User::new("u1")).unwrap();
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut topic = base_topic(DigestMode::Normal);
    topic.digest_cursor_end = Some(start);
    storage.upsert_topic(&topic).unwrap();
    storage
        .upsert_source(&Source {
            id: "s1".into(),
            user_id: "u1".into(),
            topic_id: "t1".into(),
            source_type: "rss".into(),
            name: "feed".into(),
            config: Default::default(),
            cursor: Default::default(),
            is_enabled: true,
            weight: None,
        })
        .unwrap();

    let registry = ConnectorRegistry::new();
    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(8);
    let config = PipelineConfig::default();
    let runner = PipelineRunner::new(&storage, &registry, &router, &embedder, &config);

    let now = start + chrono::Duration::hours(5);
    let scheduler_config = digestor_core::config::SchedulerConfig::default();
    let mut last_end = start;
    let mut current_topic = storage.get_topic("t1").unwrap().unwrap();

    loop {
        let windows = due_windows(&current_topic, now, &scheduler_config);
        let Some(window) = windows.first().cloned() else {
            break;
        };
        assert!(window.window_end > last_end, "P9: must never skip or re-run a due window out of order");
        runner.run_window(&current_topic, window.window_start, window.window_end).await.unwrap();
        last_end = window.window_end;
        current_topic = storage.get_topic("t1").unwrap().unwrap();
        assert_eq!(current_topic.digest_cursor_end, Some(last_end));
    }

    assert_eq!(current_topic.digest_cursor_end, Some(last_end));
    assert!(last_end > start);
}

#[tokio::test]
async fn embed_batch_failure_leaves_no_partial_vectors() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    let topic = db.seed_topic("u1", "t1", "s1");

    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let a = db.seed_item("u1", "s1", "a", start + chrono::Duration::minutes(5), Vec::new());
    let b = db.seed_item("u1", "s1", "b", start + chrono::Duration::minutes(6), Vec::new());

    let result = digestor_core::stages::run_embed(
        storage,
        &BrokenEmbeddingClient { dims: 8 },
        "u1",
        &topic,
        None,
        DigestMode::Normal,
        &digestor_core::config::EmbedConfig {
            max_items: 10,
            batch_size: 10,
            max_input_chars: 4000,
        },
    )
    .await
    .unwrap();

    assert_eq!(result.embedded, 0);
    assert_eq!(result.errors, 2);
    assert!(storage.get_embedding(&a).unwrap().is_none());
    assert!(storage.get_embedding(&b).unwrap().is_none());
}
