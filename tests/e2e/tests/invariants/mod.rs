//! Black-box invariant checks that need a real `Storage` to observe — as
//! opposed to invariants already covered by `#[cfg(test)]` modules
//! alongside each pure algorithm.

use chrono::{TimeZone, Utc};
use digestor_core::model::{Cluster, ClusterItem};
use digestor_core::stages::{run_cluster, run_dedupe};

use digestor_e2e_tests::harness::TestDatabaseManager;

/// A ContentItem belongs to at most one cluster. The unique index on
/// `cluster_items.content_item_id` is what actually enforces this; here we
/// confirm `insert_cluster_item` surfaces that as a clean `false` rather
/// than an error, and that `run_cluster` never double-attaches an item
/// across two runs over the same window.
#[test]
fn content_item_belongs_to_at_most_one_cluster() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    db.seed_topic("u1", "t1", "s1");

    storage
        .create_cluster(
            "u1",
            "t1",
            &Cluster {
                id: "c1".into(),
                user_id: "u1".into(),
                representative_content_item_id: None,
                centroid_vector: vec![1.0, 0.0],
                updated_at: Utc::now(),
                member_count: 1,
            },
        )
        .unwrap();

    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let item_id = db.seed_item("u1", "s1", "a", start, vec![1.0, 0.0]);

    let first = storage
        .insert_cluster_item(&ClusterItem {
            cluster_id: "c1".into(),
            content_item_id: item_id.clone(),
            similarity: 0.99,
        })
        .unwrap();
    assert!(first, "first insert should succeed");

    let second = storage
        .insert_cluster_item(&ClusterItem {
            cluster_id: "c1".into(),
            content_item_id: item_id.clone(),
            similarity: 0.99,
        })
        .unwrap();
    assert!(!second, "a content item already in a cluster cannot be inserted again");

    assert!(storage.is_item_clustered(&item_id).unwrap());

    // Running Cluster again over the same window should not attach the item
    // a second time — it's filtered out of `unclustered_items_in_window`.
    let window_end = start + chrono::Duration::hours(1);
    let result = run_cluster(storage, "u1", "t1", start, window_end, 500, 7, 0.86, true).unwrap();
    assert_eq!(result.attempted, 0);
}

/// `duplicate_of_content_item_id` chains never form a cycle and always
/// point to a strictly older item — never the item itself, never a newer
/// one.
#[test]
fn dedupe_never_marks_an_item_a_duplicate_of_itself_or_something_newer() {
    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    db.seed_topic("u1", "t1", "s1");

    let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
    let t3 = Utc.with_ymd_and_hms(2026, 1, 5, 11, 0, 0).unwrap();

    let older = db.seed_item("u1", "s1", "older", t1, vec![1.0, 0.0]);
    let middle = db.seed_item("u1", "s1", "middle", t2, vec![0.999, 0.045]);
    let newest = db.seed_item("u1", "s1", "newest", t3, vec![0.999, 0.045]);

    let window_start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let window_end = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
    run_dedupe(storage, "t1", window_start, window_end, 500, 30, 0.99).unwrap();

    let older_row = storage.get_content_item(&older).unwrap().unwrap();
    let middle_row = storage.get_content_item(&middle).unwrap().unwrap();
    let newest_row = storage.get_content_item(&newest).unwrap().unwrap();

    assert!(older_row.duplicate_of_content_item_id.is_none(), "the oldest item has no older neighbor to point at");

    if let Some(dup_of) = &middle_row.duplicate_of_content_item_id {
        assert_eq!(dup_of, &older, "middle can only be a duplicate of the strictly older item");
    }
    if let Some(dup_of) = &newest_row.duplicate_of_content_item_id {
        assert!(dup_of == &older || dup_of == &middle, "newest can only point backward in time");
        assert_ne!(dup_of, &newest, "an item is never its own duplicate");
    }
}

/// Every `DigestItem` has exactly one of `cluster_id`/`content_item_id` set,
/// and ranks are dense and contiguous `1..N` regardless of whether the
/// underlying candidate was a cluster or a lone item.
#[test]
fn digest_items_have_exactly_one_ref_and_dense_ranks() {
    use digestor_core::model::{DigestMode, JsonMap};
    use digestor_core::stages::{write_digest, CandidateRef, CandidateRow, RankedCandidate};
    use std::collections::HashMap;

    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;

    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let make = |candidate_ref: CandidateRef, score: f64| RankedCandidate {
        row: CandidateRow {
            candidate_ref,
            source_type: "rss".into(),
            source_id: "s1".into(),
            candidate_at: at,
            vector: vec![1.0, 0.0],
            title: None,
            body_text: None,
            primary_url: None,
            author: None,
            member_sources: None,
            recency01: 0.5,
            engagement01: 0.5,
            heuristic_score: 0.5,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        },
        score,
        triage_json: JsonMap::new(),
    };

    let selected = vec![
        make(CandidateRef::Cluster { cluster_id: "c1".into() }, 0.9),
        make(CandidateRef::Item { content_item_id: "i1".into() }, 0.8),
        make(CandidateRef::Cluster { cluster_id: "c2".into() }, 0.7),
    ];

    let digest_id = write_digest(
        storage,
        "u1",
        "t1",
        at,
        at + chrono::Duration::hours(1),
        DigestMode::Normal,
        &selected,
        &HashMap::new(),
    )
    .unwrap();

    let items = storage.get_digest_items(&digest_id).unwrap();
    assert_eq!(items.len(), 3);
    for (idx, item) in items.iter().enumerate() {
        assert_eq!(item.rank, (idx + 1) as u32, "ranks must be dense and contiguous");
        assert_ne!(
            item.cluster_id.is_some(),
            item.content_item_id.is_some(),
            "exactly one of cluster_id/content_item_id must be set"
        );
    }
}

/// Advancing the scheduler one tick at a time over a real `Topic` row never
/// skips a due window, and after each successful tick `digest_cursor_end`
/// equals the most recently emitted window end.
#[test]
fn scheduler_cursor_tracks_last_emitted_window() {
    use digestor_core::config::SchedulerConfig;
    use digestor_core::scheduler::due_windows;

    let db = TestDatabaseManager::new_in_memory();
    let storage = &db.storage;
    let mut topic = db.seed_topic("u1", "t1", "s1");
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    topic.digest_cursor_end = Some(start);
    storage.upsert_topic(&topic).unwrap();

    let now = start + chrono::Duration::hours(4);
    let config = SchedulerConfig::default();

    loop {
        let current = storage.get_topic("t1").unwrap().unwrap();
        let windows = due_windows(&current, now, &config);
        let Some(window) = windows.first().cloned() else {
            break;
        };
        assert!(window.window_start >= current.digest_cursor_end.unwrap());
        storage.advance_topic_cursor("t1", window.window_end).unwrap();
        let after = storage.get_topic("t1").unwrap().unwrap();
        assert_eq!(after.digest_cursor_end, Some(window.window_end));
    }

    let final_topic = storage.get_topic("t1").unwrap().unwrap();
    assert!(final_topic.digest_cursor_end.unwrap() > start);
    assert!(due_windows(&final_topic, now, &config).is_empty(), "no window left unprocessed that was actually due");
}
