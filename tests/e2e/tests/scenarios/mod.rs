//! End-to-end walkthroughs driving `PipelineRunner::run_window` against a
//! real `Storage` the way a single scheduler tick would.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use digestor_core::config::PipelineConfig;
use digestor_core::connector::{ConnectorRegistry, StaticConnector};
use digestor_core::llm::{HashEmbeddingClient, StaticLlmRouter};
use digestor_core::model::{ContentItemDraft, DigestMode, JsonMap};
use digestor_core::pipeline::PipelineRunner;

use digestor_e2e_tests::harness::TestDatabaseManager;

/// A window with no new items yields no digest, but the cursor still
/// advances so the next tick starts from the window end, not its start.
#[tokio::test]
async fn empty_window_advances_cursor_without_a_digest() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    let topic = db.seed_topic("u1", "t1", "s1");

    let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::hours(1);

    let registry = ConnectorRegistry::new();
    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(8);
    let config = PipelineConfig::default();
    let runner = PipelineRunner::new(storage, &registry, &router, &embedder, &config);

    let result = runner.run_window(&topic, start, end).await.unwrap();

    assert_eq!(result.ingest.total_fetched(), 0);
    assert!(result.digest_id.is_none());
    assert!(!result.digest_skipped_due_to_credits, "an empty window isn't a credits skip");
    assert_eq!(storage.get_topic("t1").unwrap().unwrap().digest_cursor_end, Some(end));
}

/// Two near-duplicate items published minutes apart in the same window.
/// Dedupe marks the later one a duplicate of the earlier one before Cluster
/// and candidate assembly ever see it, so the digest carries only one entry
/// for the pair — never both, and never the duplicate alone.
#[tokio::test]
async fn near_duplicate_items_collapse_to_one_digest_entry() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    let topic = db.seed_topic("u1", "t1", "s1");

    let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::hours(1);

    let original = ContentItemDraft {
        source_type: "rss".into(),
        external_id: Some("original".into()),
        title: Some("rust 2.0 ships const generics everywhere".into()),
        body_text: Some("a long writeup about the new const generics support".into()),
        published_at: Some(start + chrono::Duration::minutes(5)),
        ..Default::default()
    };
    let reprint = ContentItemDraft {
        source_type: "rss".into(),
        external_id: Some("reprint".into()),
        title: Some("rust 2.0 ships const generics everywhere".into()),
        body_text: Some("a long writeup about the new const generics support".into()),
        published_at: Some(start + chrono::Duration::minutes(20)),
        ..Default::default()
    };

    // Same title and body text (a syndicated reprint), so `HashEmbeddingClient`
    // produces byte-identical vectors and Dedupe's cosine check trips the
    // default 0.995 threshold deterministically.
    let connector = Arc::new(StaticConnector::new(vec![original, reprint]));
    let mut registry = ConnectorRegistry::new();
    registry.register("rss", connector);

    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(16);
    let config = PipelineConfig::default();
    let runner = PipelineRunner::new(storage, &registry, &router, &embedder, &config);

    let result = runner.run_window(&topic, start, end).await.unwrap();

    assert_eq!(result.ingest.total_fetched(), 2);
    assert_eq!(result.embed.embedded, 2);
    assert_eq!(result.dedupe.deduped, 1, "the reprint must be marked a duplicate");

    let digest_id = result.digest_id.expect("one surviving item still produces a digest");
    let items = storage.get_digest_items(&digest_id).unwrap();
    assert_eq!(items.len(), 1, "the duplicate pair must surface as exactly one digest entry");
}

/// With the monthly credit budget already exhausted, the run still
/// completes — on free connectors only, clamped to low mode, and without
/// touching the triage/embedding LLM budget any further.
#[tokio::test]
async fn budget_stop_clamps_to_low_and_skips_paid_work() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    let mut topic = db.seed_topic("u1", "t1", "s1");
    topic.digest_mode = DigestMode::High;
    storage.upsert_topic(&topic).unwrap();

    let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::hours(1);

    storage
        .insert_provider_call(&digestor_core::model::ProviderCall {
            id: "exhaust-1".into(),
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

    let connector = Arc::new(StaticConnector::new(vec![ContentItemDraft {
        source_type: "rss".into(),
        external_id: Some("still-free".into()),
        title: Some("a free rss item arriving during the stop".into()),
        body_text: Some("free connectors keep working even when paid budget is gone".into()),
        published_at: Some(start + chrono::Duration::minutes(10)),
        ..Default::default()
    }]));
    let mut registry = ConnectorRegistry::new();
    registry.register("rss", connector);

    let router = StaticLlmRouter::default();
    let embedder = HashEmbeddingClient::new(16);
    let config = PipelineConfig::default();
    let runner = PipelineRunner::new(storage, &registry, &router, &embedder, &config);

    let result = runner.run_window(&topic, start, end).await.unwrap();

    assert_eq!(result.tier, DigestMode::Low);
    assert!(!result.credits_status.paid_calls_allowed);
    // The rss source is free, so ingest still runs and the item is embedded —
    // only the paid digest sub-stages (triage, enrichment) are skipped.
    assert_eq!(result.ingest.total_fetched(), 1);
    assert!(result.digest_skipped_due_to_credits);
    assert!(result.digest_id.is_none());
    assert!(result.triage.is_none());
    assert!(result.enrichment.is_none());

    let triage_calls = storage.count_provider_calls("u1", "triage", start - chrono::Duration::days(1)).unwrap();
    assert_eq!(triage_calls, 1, "only the pre-seeded call; no new triage spend during a stop");
}
