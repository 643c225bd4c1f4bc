//! Test Database Manager
//!
//! Provides isolated storage instances for testing: an in-memory database by
//! default, or a file-backed one in a temporary directory when a test needs
//! to reopen the same database across two `Storage` handles.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use digestor_core::model::{Source, Topic, User};
use digestor_core::storage::Storage;
use tempfile::TempDir;

/// Owns a `Storage` instance for the duration of one test.
///
/// File-backed instances are created in a temporary directory that is
/// cleaned up automatically when the manager is dropped.
pub struct TestDatabaseManager {
    pub storage: Storage,
    _temp_dir: Option<TempDir>,
    db_path: Option<PathBuf>,
}

impl TestDatabaseManager {
    /// Create a fresh in-memory database. The common case: tests that don't
    /// need to reopen storage from a file.
    pub fn new_in_memory() -> Self {
        let storage = Storage::open_in_memory().expect("failed to open in-memory storage");
        Self {
            storage,
            _temp_dir: None,
            db_path: None,
        }
    }

    /// Create a file-backed database in a fresh temporary directory.
    pub fn new_temp_file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db_path = temp_dir.path().join("digestor-test.db");
        let storage = Storage::open(&db_path).expect("failed to open file-backed storage");
        Self {
            storage,
            _temp_dir: Some(temp_dir),
            db_path: Some(db_path),
        }
    }

    /// Path to the database file, if this manager is file-backed.
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Seed one user, one enabled topic, and one enabled `rss` source,
    /// returning the topic. Every scenario test starts from this baseline.
    pub fn seed_topic(&self, user_id: &str, topic_id: &str, source_id: &str) -> Topic {
        self.storage.upsert_user(&User::new(user_id)).expect("upsert_user");

        let topic = Topic {
            id: topic_id.to_string(),
            user_id: user_id.to_string(),
            name: "rust-news".into(),
            digest_schedule_enabled: true,
            digest_interval_minutes: 60,
            digest_mode: digestor_core::model::DigestMode::Normal,
            digest_depth: 20,
            digest_cursor_end: None,
            decay_hours: None,
        };
        self.storage.upsert_topic(&topic).expect("upsert_topic");

        self.storage
            .upsert_source(&Source {
                id: source_id.to_string(),
                user_id: user_id.to_string(),
                topic_id: topic_id.to_string(),
                source_type: "rss".into(),
                name: "seed feed".into(),
                config: Default::default(),
                cursor: Default::default(),
                is_enabled: true,
                weight: None,
            })
            .expect("upsert_source");

        topic
    }

    /// Insert a content item with an embedding already attached, linked to
    /// `source_id`. Returns the item's id.
    pub fn seed_item(
        &self,
        user_id: &str,
        source_id: &str,
        external_id: &str,
        published_at: DateTime<Utc>,
        vector: Vec<f64>,
    ) -> String {
        let draft = digestor_core::model::ContentItemDraft {
            source_type: "rss".into(),
            external_id: Some(external_id.into()),
            title: Some(format!("item {external_id}")),
            body_text: Some("body text long enough for heuristics to engage".into()),
            published_at: Some(published_at),
            ..Default::default()
        };
        let (id, _) = self
            .storage
            .upsert_content_item_draft(user_id, source_id, "rss", &draft, published_at)
            .expect("upsert_content_item_draft");
        self.storage
            .link_content_item_source(&id, source_id, published_at)
            .expect("link_content_item_source");
        if !vector.is_empty() {
            self.storage
                .upsert_embedding(&digestor_core::model::Embedding {
                    content_item_id: id.clone(),
                    model: "hash-embed-v1".into(),
                    dims: vector.len(),
                    vector,
                })
                .expect("upsert_embedding");
        }
        id
    }
}
