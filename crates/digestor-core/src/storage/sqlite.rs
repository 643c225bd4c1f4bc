//! SQLite storage gateway implementation.
//!
//! Single writer connection behind a `Mutex`, matching the concurrency
//! model of §5: the relational store is the only shared mutable state, and
//! within one pipeline run stages already serialize their own access. WAL
//! mode lets readers elsewhere in a real deployment proceed concurrently
//! with this process's writes.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest as Sha2Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::model::*;

use super::migrations::MIGRATIONS;

pub struct Storage {
    conn: Mutex<Connection>,
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Invariant(format!("invalid timestamp {s}: {e}")))
}

fn parse_dt_opt(s: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    s.map(|s| parse_dt(&s)).transpose()
}

fn json_to_map(s: &str) -> StorageResult<JsonMap> {
    if s.is_empty() {
        return Ok(JsonMap::new());
    }
    match serde_json::from_str::<serde_json::Value>(s)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(JsonMap::new()),
    }
}

fn map_to_json(m: &JsonMap) -> String {
    serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string())
}

fn vector_to_json(v: &Vector) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn json_to_vector(s: &str) -> StorageResult<Vector> {
    Ok(serde_json::from_str(s)?)
}

fn opt_json_to_map(s: Option<String>) -> StorageResult<Option<JsonMap>> {
    s.map(|s| json_to_map(&s)).transpose()
}

/// Stable synthetic `external_id` per §4.3: `SHA-256(source_id ∥
/// source_type ∥ title ∥ body ∥ canonical_url ∥ published_at ∥ author)`.
fn synthetic_external_id(
    source_id: &str,
    source_type: &str,
    title: Option<&str>,
    body: Option<&str>,
    canonical_url: Option<&str>,
    published_at: Option<DateTime<Utc>>,
    author: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(source_type.as_bytes());
    hasher.update(title.unwrap_or_default().as_bytes());
    hasher.update(body.unwrap_or_default().as_bytes());
    hasher.update(canonical_url.unwrap_or_default().as_bytes());
    hasher.update(
        published_at
            .map(|d| d.to_rfc3339())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(author.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `hash_url = SHA-256(canonicalizedUrl)` (§4.3).
pub fn hash_url(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Storage {
    fn configure_connection(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, description TEXT NOT NULL)",
        )?;
        let applied: u32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |r| r.get(0))
            .unwrap_or(0);
        for migration in MIGRATIONS {
            if migration.version > applied {
                conn.execute_batch(migration.up)
                    .map_err(|e| StorageError::Migration(format!("v{}: {e}", migration.version)))?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
                    params![migration.version, migration.description],
                )?;
            }
        }
        Ok(())
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("storage mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn upsert_user(&self, user: &User) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO users (id, created_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![user.id, to_rfc3339(user.created_at)],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        self.lock()
            .query_row("SELECT id, created_at FROM users WHERE id = ?1", params![id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .optional()?
            .map(|(id, created_at)| -> StorageResult<User> {
                Ok(User {
                    id,
                    created_at: parse_dt(&created_at)?,
                })
            })
            .transpose()
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    pub fn upsert_topic(&self, topic: &Topic) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO topics (id, user_id, name, digest_schedule_enabled, digest_interval_minutes,
                digest_mode, digest_depth, digest_cursor_end, decay_hours)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                digest_schedule_enabled = excluded.digest_schedule_enabled,
                digest_interval_minutes = excluded.digest_interval_minutes,
                digest_mode = excluded.digest_mode,
                digest_depth = excluded.digest_depth,
                digest_cursor_end = excluded.digest_cursor_end,
                decay_hours = excluded.decay_hours",
            params![
                topic.id,
                topic.user_id,
                topic.name,
                topic.digest_schedule_enabled,
                topic.digest_interval_minutes,
                topic.digest_mode.to_string(),
                topic.digest_depth,
                topic.digest_cursor_end.map(to_rfc3339),
                topic.decay_hours,
            ],
        )?;
        Ok(())
    }

    fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, bool, i64, String, u8, Option<String>, Option<f64>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    }

    pub fn get_topic(&self, id: &str) -> StorageResult<Option<Topic>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, name, digest_schedule_enabled, digest_interval_minutes,
                    digest_mode, digest_depth, digest_cursor_end, decay_hours
                 FROM topics WHERE id = ?1",
                params![id],
                Self::row_to_topic,
            )
            .optional()?;
        row.map(Self::build_topic).transpose()
    }

    fn build_topic(
        row: (String, String, String, bool, i64, String, u8, Option<String>, Option<f64>),
    ) -> StorageResult<Topic> {
        use std::str::FromStr;
        Ok(Topic {
            id: row.0,
            user_id: row.1,
            name: row.2,
            digest_schedule_enabled: row.3,
            digest_interval_minutes: row.4,
            digest_mode: DigestMode::from_str(&row.5)
                .map_err(StorageError::Invariant)?,
            digest_depth: row.6,
            digest_cursor_end: parse_dt_opt(row.7)?,
            decay_hours: row.8,
        })
    }

    pub fn advance_topic_cursor(&self, topic_id: &str, cursor_end: DateTime<Utc>) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE topics SET digest_cursor_end = ?1 WHERE id = ?2",
            params![to_rfc3339(cursor_end), topic_id],
        )?;
        Ok(())
    }

    /// Every topic with its schedule enabled, across all users, for the
    /// runner to drive one scheduler tick over (§4.17).
    pub fn list_enabled_topics(&self) -> StorageResult<Vec<Topic>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, digest_schedule_enabled, digest_interval_minutes,
                digest_mode, digest_depth, digest_cursor_end, decay_hours
             FROM topics WHERE digest_schedule_enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_topic)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::build_topic).collect()
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    pub fn upsert_source(&self, source: &Source) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO sources (id, user_id, topic_id, type, name, config, cursor, is_enabled, weight)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                config = excluded.config, cursor = excluded.cursor,
                is_enabled = excluded.is_enabled, weight = excluded.weight",
            params![
                source.id,
                source.user_id,
                source.topic_id,
                source.source_type,
                source.name,
                map_to_json(&source.config),
                map_to_json(&source.cursor),
                source.is_enabled,
                source.weight,
            ],
        )?;
        Ok(())
    }

    fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
        let config: String = row.get(5)?;
        let cursor: String = row.get(6)?;
        Ok(Source {
            id: row.get(0)?,
            user_id: row.get(1)?,
            topic_id: row.get(2)?,
            source_type: row.get(3)?,
            name: row.get(4)?,
            config: json_to_map(&config).unwrap_or_default(),
            cursor: json_to_map(&cursor).unwrap_or_default(),
            is_enabled: row.get(7)?,
            weight: row.get(8)?,
        })
    }

    pub fn list_enabled_sources(&self, topic_id: &str) -> StorageResult<Vec<Source>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, topic_id, type, name, config, cursor, is_enabled, weight
             FROM sources WHERE topic_id = ?1 AND is_enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![topic_id], Self::row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_source(&self, id: &str) -> StorageResult<Option<Source>> {
        self.lock()
            .query_row(
                "SELECT id, user_id, topic_id, type, name, config, cursor, is_enabled, weight
                 FROM sources WHERE id = ?1",
                params![id],
                Self::row_to_source,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn update_source_cursor(&self, source_id: &str, cursor: &JsonMap) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE sources SET cursor = ?1 WHERE id = ?2",
            params![map_to_json(cursor), source_id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content items
    // ------------------------------------------------------------------

    fn row_to_content_item(row: &rusqlite::Row) -> rusqlite::Result<RawContentItemRow> {
        Ok(RawContentItemRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            source_id: row.get(2)?,
            source_type: row.get(3)?,
            external_id: row.get(4)?,
            canonical_url: row.get(5)?,
            title: row.get(6)?,
            body_text: row.get(7)?,
            author: row.get(8)?,
            published_at: row.get(9)?,
            fetched_at: row.get(10)?,
            metadata: row.get(11)?,
            raw: row.get(12)?,
            hash_url: row.get(13)?,
            hash_text: row.get(14)?,
            duplicate_of_content_item_id: row.get(15)?,
            deleted_at: row.get(16)?,
        })
    }

    fn build_content_item(row: RawContentItemRow) -> StorageResult<ContentItem> {
        Ok(ContentItem {
            id: row.id,
            user_id: row.user_id,
            source_id: row.source_id,
            source_type: row.source_type,
            external_id: row.external_id,
            canonical_url: row.canonical_url,
            title: row.title,
            body_text: row.body_text,
            author: row.author,
            published_at: parse_dt_opt(row.published_at)?,
            fetched_at: parse_dt(&row.fetched_at)?,
            metadata: json_to_map(&row.metadata)?,
            raw: json_to_map(&row.raw)?,
            hash_url: row.hash_url,
            hash_text: row.hash_text,
            duplicate_of_content_item_id: row.duplicate_of_content_item_id,
            deleted_at: parse_dt_opt(row.deleted_at)?,
        })
    }

    const CONTENT_ITEM_COLUMNS: &'static str = "id, user_id, source_id, source_type, external_id, canonical_url,
        title, body_text, author, published_at, fetched_at, metadata, raw, hash_url, hash_text,
        duplicate_of_content_item_id, deleted_at";

    /// Upsert one connector-produced draft per the conflict-key order in
    /// §4.3: `(source_id, external_id)` if present, else `(user_id,
    /// hash_url)` if a canonical URL is present, else a stable synthetic
    /// `external_id`. Returns `(content_item_id, was_inserted)`.
    pub fn upsert_content_item_draft(
        &self,
        user_id: &str,
        source_id: &str,
        source_type_for_default: &str,
        draft: &ContentItemDraft,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<(String, bool)> {
        let canonical_url = draft.canonical_url.clone();
        let hash_url_value = canonical_url.as_deref().map(hash_url);

        let external_id = draft.external_id.clone().unwrap_or_else(|| {
            synthetic_external_id(
                source_id,
                &draft.source_type,
                draft.title.as_deref(),
                draft.body_text.as_deref(),
                canonical_url.as_deref(),
                draft.published_at,
                draft.author.as_deref(),
            )
        });

        let conn = self.lock();

        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM content_items WHERE source_id = ?1 AND external_id = ?2",
                params![source_id, external_id],
                |r| r.get(0),
            )
            .optional()?
            .or(if let Some(h) = &hash_url_value {
                conn.query_row(
                    "SELECT id FROM content_items WHERE user_id = ?1 AND hash_url = ?2",
                    params![user_id, h],
                    |r| r.get(0),
                )
                .optional()?
            } else {
                None
            });

        if let Some(id) = existing_id {
            conn.execute(
                "UPDATE content_items SET title = ?1, body_text = ?2, author = ?3, published_at = ?4,
                    metadata = ?5, raw = ?6, canonical_url = ?7, hash_url = ?8
                 WHERE id = ?9",
                params![
                    draft.title,
                    draft.body_text,
                    draft.author,
                    draft.published_at.map(to_rfc3339),
                    map_to_json(&draft.metadata),
                    map_to_json(&draft.raw),
                    canonical_url,
                    hash_url_value,
                    id,
                ],
            )?;
            return Ok((id, false));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            &format!(
                "INSERT INTO content_items ({cols}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL, NULL)",
                cols = Self::CONTENT_ITEM_COLUMNS
            ),
            params![
                id,
                user_id,
                source_id,
                if draft.source_type.is_empty() { source_type_for_default } else { draft.source_type.as_str() },
                external_id,
                canonical_url,
                draft.title,
                draft.body_text,
                draft.author,
                draft.published_at.map(to_rfc3339),
                to_rfc3339(fetched_at),
                map_to_json(&draft.metadata),
                map_to_json(&draft.raw),
                hash_url_value,
            ],
        )?;
        Ok((id, true))
    }

    pub fn link_content_item_source(
        &self,
        content_item_id: &str,
        source_id: &str,
        added_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO content_item_sources (content_item_id, source_id, added_at)
             VALUES (?1, ?2, ?3) ON CONFLICT(content_item_id, source_id) DO NOTHING",
            params![content_item_id, source_id, to_rfc3339(added_at)],
        )?;
        Ok(())
    }

    /// Upsert one connector-produced draft and link its `content_item_sources`
    /// row in a single transaction, so a failure partway through never leaves
    /// an item upserted without its source link (§5: "Transactions wrap:
    /// ingest upserts of one raw item"). Same conflict-key order as
    /// `upsert_content_item_draft`.
    pub fn upsert_content_item_draft_and_link(
        &self,
        user_id: &str,
        source_id: &str,
        source_type_for_default: &str,
        draft: &ContentItemDraft,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<(String, bool)> {
        let canonical_url = draft.canonical_url.clone();
        let hash_url_value = canonical_url.as_deref().map(hash_url);

        let external_id = draft.external_id.clone().unwrap_or_else(|| {
            synthetic_external_id(
                source_id,
                &draft.source_type,
                draft.title.as_deref(),
                draft.body_text.as_deref(),
                canonical_url.as_deref(),
                draft.published_at,
                draft.author.as_deref(),
            )
        });

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing_id: Option<String> = tx
            .query_row(
                "SELECT id FROM content_items WHERE source_id = ?1 AND external_id = ?2",
                params![source_id, external_id],
                |r| r.get(0),
            )
            .optional()?
            .or(if let Some(h) = &hash_url_value {
                tx.query_row(
                    "SELECT id FROM content_items WHERE user_id = ?1 AND hash_url = ?2",
                    params![user_id, h],
                    |r| r.get(0),
                )
                .optional()?
            } else {
                None
            });

        let (id, inserted) = if let Some(id) = existing_id {
            tx.execute(
                "UPDATE content_items SET title = ?1, body_text = ?2, author = ?3, published_at = ?4,
                    metadata = ?5, raw = ?6, canonical_url = ?7, hash_url = ?8
                 WHERE id = ?9",
                params![
                    draft.title,
                    draft.body_text,
                    draft.author,
                    draft.published_at.map(to_rfc3339),
                    map_to_json(&draft.metadata),
                    map_to_json(&draft.raw),
                    canonical_url,
                    hash_url_value,
                    id,
                ],
            )?;
            (id, false)
        } else {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                &format!(
                    "INSERT INTO content_items ({cols}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL, NULL, NULL)",
                    cols = Self::CONTENT_ITEM_COLUMNS
                ),
                params![
                    id,
                    user_id,
                    source_id,
                    if draft.source_type.is_empty() { source_type_for_default } else { draft.source_type.as_str() },
                    external_id,
                    canonical_url,
                    draft.title,
                    draft.body_text,
                    draft.author,
                    draft.published_at.map(to_rfc3339),
                    to_rfc3339(fetched_at),
                    map_to_json(&draft.metadata),
                    map_to_json(&draft.raw),
                    hash_url_value,
                ],
            )?;
            (id, true)
        };

        tx.execute(
            "INSERT INTO content_item_sources (content_item_id, source_id, added_at)
             VALUES (?1, ?2, ?3) ON CONFLICT(content_item_id, source_id) DO NOTHING",
            params![id, source_id, to_rfc3339(fetched_at)],
        )?;

        tx.commit()?;
        Ok((id, inserted))
    }

    pub fn get_content_item(&self, id: &str) -> StorageResult<Option<ContentItem>> {
        let row = self
            .lock()
            .query_row(
                &format!("SELECT {} FROM content_items WHERE id = ?1", Self::CONTENT_ITEM_COLUMNS),
                params![id],
                Self::row_to_content_item,
            )
            .optional()?;
        row.map(Self::build_content_item).transpose()
    }

    pub fn mark_duplicate(&self, content_item_id: &str, duplicate_of: &str) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE content_items SET duplicate_of_content_item_id = ?1 WHERE id = ?2",
            params![duplicate_of, content_item_id],
        )?;
        Ok(())
    }

    pub fn set_hash_text(&self, content_item_id: &str, hash_text: &str) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE content_items SET hash_text = ?1 WHERE id = ?2",
            params![hash_text, content_item_id],
        )?;
        Ok(())
    }

    /// Items topic-scoped (via `content_item_sources` -> `sources.topic_id`),
    /// optionally window-bounded, not deleted, not a duplicate, that either
    /// lack an embedding at `(model, dims)` or have one missing
    /// `hash_text` (§4.4).
    pub fn items_needing_embedding(
        &self,
        topic_id: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        model: &str,
        dims: usize,
        limit: usize,
    ) -> StorageResult<Vec<ContentItem>> {
        let conn = self.lock();
        let (where_window, w0, w1) = match window {
            Some((s, e)) => (
                "AND COALESCE(ci.published_at, ci.fetched_at) >= ?4 AND COALESCE(ci.published_at, ci.fetched_at) < ?5",
                to_rfc3339(s),
                to_rfc3339(e),
            ),
            None => ("", String::new(), String::new()),
        };
        let sql = format!(
            "SELECT DISTINCT {cols} FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             LEFT JOIN embeddings e ON e.content_item_id = ci.id
             WHERE s.topic_id = ?1 AND ci.deleted_at IS NULL AND ci.duplicate_of_content_item_id IS NULL
               AND (e.content_item_id IS NULL OR e.model != ?2 OR e.dims != ?3 OR ci.hash_text IS NULL)
               {where_window}
             ORDER BY ci.id LIMIT {limit}",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<RawContentItemRow> = if window.is_some() {
            stmt.query_map(params![topic_id, model, dims as i64, w0, w1], Self::row_to_content_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![topic_id, model, dims as i64], Self::row_to_content_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter().map(Self::build_content_item).collect()
    }

    /// Topic-scoped, window-bounded, non-deleted, non-duplicate, non-signal
    /// items that already have an embedding (used by Dedupe and Cluster).
    pub fn embedded_items_in_window(
        &self,
        topic_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<(ContentItem, Embedding)>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT DISTINCT {cols}, e.model, e.dims, e.vector FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             JOIN embeddings e ON e.content_item_id = ci.id
             WHERE s.topic_id = ?1 AND ci.deleted_at IS NULL AND ci.duplicate_of_content_item_id IS NULL
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id LIMIT {limit}",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(RawContentItemRow, String, i64, String)> = stmt
            .query_map(
                params![topic_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                |row| {
                    Ok((
                        Self::row_to_content_item(row)?,
                        row.get(17)?,
                        row.get(18)?,
                        row.get(19)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(raw, model, dims, vector)| {
                let item = Self::build_content_item(raw)?;
                let embedding = Embedding {
                    content_item_id: item.id.clone(),
                    model,
                    dims: dims as usize,
                    vector: json_to_vector(&vector)?,
                };
                Ok((item, embedding))
            })
            .filter(|r: &StorageResult<(ContentItem, Embedding)>| {
                r.as_ref().map(|(i, _)| !i.is_signal_bundle()).unwrap_or(true)
            })
            .collect()
    }

    /// Older topic-scoped, non-duplicate, non-signal embedded items with
    /// `t < before`, within `[lookback_start, before)`, for Dedupe's
    /// nearest-older-neighbor search.
    pub fn embedded_items_before(
        &self,
        topic_id: &str,
        lookback_start: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> StorageResult<Vec<(ContentItem, Embedding)>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT DISTINCT {cols}, e.model, e.dims, e.vector FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             JOIN embeddings e ON e.content_item_id = ci.id
             WHERE s.topic_id = ?1 AND ci.deleted_at IS NULL AND ci.duplicate_of_content_item_id IS NULL
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(RawContentItemRow, String, i64, String)> = stmt
            .query_map(
                params![topic_id, to_rfc3339(lookback_start), to_rfc3339(before)],
                |row| {
                    Ok((
                        Self::row_to_content_item(row)?,
                        row.get(17)?,
                        row.get(18)?,
                        row.get(19)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(raw, model, dims, vector)| {
                let item = Self::build_content_item(raw)?;
                let embedding = Embedding {
                    content_item_id: item.id.clone(),
                    model,
                    dims: dims as usize,
                    vector: json_to_vector(&vector)?,
                };
                Ok((item, embedding))
            })
            .filter(|r: &StorageResult<(ContentItem, Embedding)>| {
                r.as_ref().map(|(i, _)| !i.is_signal_bundle()).unwrap_or(true)
            })
            .collect()
    }

    /// Topic-scoped, window-bounded, non-duplicate, non-deleted, non-signal
    /// items not currently in any cluster (candidate pool for Cluster and
    /// for the non-clustered half of Candidate Assembly, §4.6–4.7).
    pub fn unclustered_items_in_window(
        &self,
        topic_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<(ContentItem, Option<Embedding>)>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT DISTINCT {cols}, e.model, e.dims, e.vector FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             LEFT JOIN embeddings e ON e.content_item_id = ci.id
             LEFT JOIN cluster_items clu ON clu.content_item_id = ci.id
             WHERE s.topic_id = ?1 AND ci.deleted_at IS NULL AND ci.duplicate_of_content_item_id IS NULL
               AND clu.content_item_id IS NULL
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id LIMIT {limit}",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(RawContentItemRow, Option<String>, Option<i64>, Option<String>)> = stmt
            .query_map(
                params![topic_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                |row| {
                    Ok((
                        Self::row_to_content_item(row)?,
                        row.get(17)?,
                        row.get(18)?,
                        row.get(19)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(raw, model, dims, vector)| {
                let item = Self::build_content_item(raw)?;
                let embedding = match (model, dims, vector) {
                    (Some(model), Some(dims), Some(vector)) => Some(Embedding {
                        content_item_id: item.id.clone(),
                        model,
                        dims: dims as usize,
                        vector: json_to_vector(&vector)?,
                    }),
                    _ => None,
                };
                Ok((item, embedding))
            })
            .filter(|r: &StorageResult<(ContentItem, Option<Embedding>)>| {
                r.as_ref().map(|(i, _)| !i.is_signal_bundle()).unwrap_or(true)
            })
            .collect()
    }

    /// Signal bundles (source type `"signal"`, no canonical URL) within a
    /// window, for Signal Corroboration (§4.13).
    pub fn signal_bundles_in_window(
        &self,
        topic_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StorageResult<Vec<ContentItem>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT DISTINCT {cols} FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             WHERE s.topic_id = ?1 AND ci.source_type = 'signal' AND ci.canonical_url IS NULL
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<RawContentItemRow> = stmt
            .query_map(
                params![topic_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                Self::row_to_content_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::build_content_item).collect()
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    pub fn get_embedding(&self, content_item_id: &str) -> StorageResult<Option<Embedding>> {
        self.lock()
            .query_row(
                "SELECT content_item_id, model, dims, vector FROM embeddings WHERE content_item_id = ?1",
                params![content_item_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(content_item_id, model, dims, vector)| {
                Ok(Embedding {
                    content_item_id,
                    model,
                    dims: dims as usize,
                    vector: json_to_vector(&vector)?,
                })
            })
            .transpose()
    }

    pub fn upsert_embedding(&self, embedding: &Embedding) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO embeddings (content_item_id, model, dims, vector) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(content_item_id) DO UPDATE SET model = excluded.model, dims = excluded.dims, vector = excluded.vector",
            params![
                embedding.content_item_id,
                embedding.model,
                embedding.dims as i64,
                vector_to_json(&embedding.vector),
            ],
        )?;
        Ok(())
    }

    /// Write a whole Embed Stage batch's `hash_text` updates and embedding
    /// upserts in one transaction, so a failure partway through the batch
    /// leaves none of it persisted (§4.4, §5, invariant P12). Each tuple is
    /// `(content_item_id, hash_text, embedding)`.
    pub fn write_embedding_batch(&self, writes: &[(String, String, Embedding)]) -> StorageResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        for (content_item_id, hash_text, embedding) in writes {
            tx.execute(
                "UPDATE content_items SET hash_text = ?1 WHERE id = ?2",
                params![hash_text, content_item_id],
            )?;
            tx.execute(
                "INSERT INTO embeddings (content_item_id, model, dims, vector) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(content_item_id) DO UPDATE SET model = excluded.model, dims = excluded.dims, vector = excluded.vector",
                params![
                    embedding.content_item_id,
                    embedding.model,
                    embedding.dims as i64,
                    vector_to_json(&embedding.vector),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Topic-scoped embeddings of items with `t` in `[start, end)`, for
    /// Novelty's lookback nearest-neighbor search (§4.12).
    pub fn embeddings_for_topic_in_range(
        &self,
        topic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<(String, Vector)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ci.id, e.vector FROM content_items ci
             JOIN content_item_sources cis ON cis.content_item_id = ci.id
             JOIN sources s ON s.id = cis.source_id
             JOIN embeddings e ON e.content_item_id = ci.id
             WHERE s.topic_id = ?1 AND ci.deleted_at IS NULL
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(
                params![topic_id, to_rfc3339(start), to_rfc3339(end)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, v)| Ok((id, json_to_vector(&v)?)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------

    fn row_to_cluster(row: &rusqlite::Row) -> rusqlite::Result<(String, String, Option<String>, String, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn build_cluster(row: (String, String, Option<String>, String, String, i64)) -> StorageResult<Cluster> {
        Ok(Cluster {
            id: row.0,
            user_id: row.1,
            representative_content_item_id: row.2,
            centroid_vector: json_to_vector(&row.3)?,
            updated_at: parse_dt(&row.4)?,
            member_count: row.5 as u64,
        })
    }

    /// Clusters of a topic whose `updated_at >= cutoff` ("hot" clusters per
    /// §4.6).
    pub fn hot_clusters(&self, topic_id: &str, cutoff: DateTime<Utc>) -> StorageResult<Vec<Cluster>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, representative_content_item_id, centroid_vector, updated_at, member_count
             FROM clusters WHERE topic_id = ?1 AND updated_at >= ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![topic_id, to_rfc3339(cutoff)], Self::row_to_cluster)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::build_cluster).collect()
    }

    pub fn get_cluster(&self, id: &str) -> StorageResult<Option<Cluster>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, user_id, representative_content_item_id, centroid_vector, updated_at, member_count
                 FROM clusters WHERE id = ?1",
                params![id],
                Self::row_to_cluster,
            )
            .optional()?;
        row.map(Self::build_cluster).transpose()
    }

    pub fn create_cluster(&self, user_id: &str, topic_id: &str, cluster: &Cluster) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO clusters (id, user_id, topic_id, representative_content_item_id, centroid_vector, updated_at, member_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cluster.id,
                user_id,
                topic_id,
                cluster.representative_content_item_id,
                vector_to_json(&cluster.centroid_vector),
                to_rfc3339(cluster.updated_at),
                cluster.member_count as i64,
            ],
        )?;
        Ok(())
    }

    pub fn update_cluster(
        &self,
        cluster_id: &str,
        centroid: &Vector,
        member_count: u64,
        updated_at: DateTime<Utc>,
        representative: Option<&str>,
    ) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE clusters SET centroid_vector = ?1, member_count = ?2, updated_at = ?3,
                representative_content_item_id = COALESCE(representative_content_item_id, ?4)
             WHERE id = ?5",
            params![
                vector_to_json(centroid),
                member_count as i64,
                to_rfc3339(updated_at),
                representative,
                cluster_id,
            ],
        )?;
        Ok(())
    }

    pub fn touch_cluster(&self, cluster_id: &str, updated_at: DateTime<Utc>) -> StorageResult<()> {
        self.lock().execute(
            "UPDATE clusters SET updated_at = ?1 WHERE id = ?2",
            params![to_rfc3339(updated_at), cluster_id],
        )?;
        Ok(())
    }

    /// Insert a `cluster_items` row if the content item isn't already
    /// assigned to a cluster. Returns `false` if it was already present:
    /// at most one cluster per item, enforced by the unique index.
    pub fn insert_cluster_item(&self, item: &ClusterItem) -> StorageResult<bool> {
        let changed = self.lock().execute(
            "INSERT INTO cluster_items (cluster_id, content_item_id, similarity) VALUES (?1, ?2, ?3)
             ON CONFLICT(content_item_id) DO NOTHING",
            params![item.cluster_id, item.content_item_id, item.similarity],
        )?;
        Ok(changed > 0)
    }

    pub fn is_item_clustered(&self, content_item_id: &str) -> StorageResult<bool> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM cluster_items WHERE content_item_id = ?1",
            params![content_item_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Members of one cluster whose candidate timestamp falls in the window
    /// (used by Candidate Assembly to pick the representative, §4.7).
    pub fn cluster_members_in_window(
        &self,
        cluster_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StorageResult<Vec<ContentItem>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {cols} FROM content_items ci
             JOIN cluster_items clu ON clu.content_item_id = ci.id
             WHERE clu.cluster_id = ?1
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY ci.id",
            cols = Self::CONTENT_ITEM_COLUMNS,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<RawContentItemRow> = stmt
            .query_map(
                params![cluster_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                Self::row_to_content_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::build_content_item).collect()
    }

    /// All `member_source` ids (`content_item_sources.source_id`) across a
    /// cluster's members, used by Diversity Selection's per-source penalty
    /// for cluster candidates (§4.14).
    pub fn cluster_member_sources(&self, cluster_id: &str) -> StorageResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT cis.source_id FROM cluster_items clu
             JOIN content_item_sources cis ON cis.content_item_id = clu.content_item_id
             WHERE clu.cluster_id = ?1 ORDER BY cis.source_id",
        )?;
        let rows = stmt
            .query_map(params![cluster_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Clusters with at least one member in the window, for Candidate
    /// Assembly (§4.7).
    pub fn clusters_with_members_in_window(
        &self,
        topic_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StorageResult<Vec<Cluster>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.id, c.user_id, c.representative_content_item_id, c.centroid_vector, c.updated_at, c.member_count
             FROM clusters c
             JOIN cluster_items clu ON clu.cluster_id = c.id
             JOIN content_items ci ON ci.id = clu.content_item_id
             WHERE c.topic_id = ?1
               AND COALESCE(ci.published_at, ci.fetched_at) >= ?2 AND COALESCE(ci.published_at, ci.fetched_at) < ?3
             ORDER BY c.id",
        )?;
        let rows = stmt
            .query_map(
                params![topic_id, to_rfc3339(window_start), to_rfc3339(window_end)],
                Self::row_to_cluster,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::build_cluster).collect()
    }

    // ------------------------------------------------------------------
    // Preference profiles
    // ------------------------------------------------------------------

    pub fn get_preference_profile(
        &self,
        user_id: &str,
        topic_id: &str,
    ) -> StorageResult<Option<TopicPreferenceProfile>> {
        let row = self
            .lock()
            .query_row(
                "SELECT user_id, topic_id, positive_vector, negative_vector, positive_count, negative_count
                 FROM topic_preference_profiles WHERE user_id = ?1 AND topic_id = ?2",
                params![user_id, topic_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(user_id, topic_id, pv, nv, pc, nc)| {
            Ok(TopicPreferenceProfile {
                user_id,
                topic_id,
                positive_vector: pv.map(|s| json_to_vector(&s)).transpose()?,
                negative_vector: nv.map(|s| json_to_vector(&s)).transpose()?,
                positive_count: pc as u64,
                negative_count: nc as u64,
            })
        })
        .transpose()
    }

    pub fn upsert_preference_profile(&self, profile: &TopicPreferenceProfile) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO topic_preference_profiles (user_id, topic_id, positive_vector, negative_vector, positive_count, negative_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, topic_id) DO UPDATE SET
                positive_vector = excluded.positive_vector, negative_vector = excluded.negative_vector,
                positive_count = excluded.positive_count, negative_count = excluded.negative_count",
            params![
                profile.user_id,
                profile.topic_id,
                profile.positive_vector.as_ref().map(vector_to_json),
                profile.negative_vector.as_ref().map(vector_to_json),
                profile.positive_count as i64,
                profile.negative_count as i64,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// `(action, sourceType, author)` for every feedback event against this
    /// topic since `since`, for Ranking's per-user `sourceTypeWeight`/
    /// `authorWeight` derivation (§4.11).
    pub fn recent_feedback_with_context(
        &self,
        topic_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<(FeedbackAction, String, Option<String>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT fe.action, ci.source_type, ci.author FROM feedback_events fe
             JOIN content_items ci ON ci.id = fe.content_item_id
             JOIN sources s ON s.id = ci.source_id
             WHERE s.topic_id = ?1 AND fe.created_at >= ?2",
        )?;
        let rows: Vec<(String, String, Option<String>)> = stmt
            .query_map(params![topic_id, to_rfc3339(since)], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(action, source_type, author)| {
                let action: FeedbackAction = serde_json::from_value(serde_json::Value::String(action))?;
                Ok((action, source_type, author))
            })
            .collect()
    }

    pub fn insert_feedback_event(&self, event: &FeedbackEvent) -> StorageResult<()> {
        let action = serde_json::to_value(event.action)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.lock().execute(
            "INSERT INTO feedback_events (id, user_id, content_item_id, digest_id, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.user_id,
                event.content_item_id,
                event.digest_id,
                action,
                to_rfc3339(event.created_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Digests
    // ------------------------------------------------------------------

    /// Upsert a `Digest` keyed by `(user_id, topic_id, window_start,
    /// window_end, mode)` and fully replace its `digest_items`, in a single
    /// transaction so readers never see a partial digest (§4.16).
    pub fn upsert_digest_with_items(
        &self,
        digest: &Digest,
        items: &[DigestItem],
    ) -> StorageResult<String> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing_id: Option<String> = tx
            .query_row(
                "SELECT id FROM digests WHERE user_id = ?1 AND topic_id = ?2 AND window_start = ?3 AND window_end = ?4 AND mode = ?5",
                params![
                    digest.user_id,
                    digest.topic_id,
                    to_rfc3339(digest.window_start),
                    to_rfc3339(digest.window_end),
                    digest.mode.to_string(),
                ],
                |r| r.get(0),
            )
            .optional()?;

        let digest_id = existing_id.unwrap_or_else(|| digest.id.clone());

        tx.execute(
            "INSERT INTO digests (id, user_id, topic_id, window_start, window_end, mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, topic_id, window_start, window_end, mode)
             DO UPDATE SET created_at = excluded.created_at",
            params![
                digest_id,
                digest.user_id,
                digest.topic_id,
                to_rfc3339(digest.window_start),
                to_rfc3339(digest.window_end),
                digest.mode.to_string(),
                to_rfc3339(digest.created_at),
            ],
        )?;

        tx.execute("DELETE FROM digest_items WHERE digest_id = ?1", params![digest_id])?;

        for item in items {
            if !item.has_exactly_one_reference() {
                return Err(StorageError::Invariant(
                    "digest item must set exactly one of cluster_id/content_item_id".to_string(),
                ));
            }
            tx.execute(
                "INSERT INTO digest_items (digest_id, rank, cluster_id, content_item_id, score, triage_json, summary_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    digest_id,
                    item.rank,
                    item.cluster_id,
                    item.content_item_id,
                    item.score,
                    item.triage_json.as_ref().map(map_to_json),
                    item.summary_json.as_ref().map(map_to_json),
                ],
            )?;
        }

        tx.commit()?;
        Ok(digest_id)
    }

    pub fn get_digest_items(&self, digest_id: &str) -> StorageResult<Vec<DigestItem>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT digest_id, rank, cluster_id, content_item_id, score, triage_json, summary_json
             FROM digest_items WHERE digest_id = ?1 ORDER BY rank",
        )?;
        let rows: Vec<(String, u32, Option<String>, Option<String>, f64, Option<String>, Option<String>)> = stmt
            .query_map(params![digest_id], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(digest_id, rank, cluster_id, content_item_id, score, triage_json, summary_json)| {
                Ok(DigestItem {
                    digest_id,
                    rank,
                    cluster_id,
                    content_item_id,
                    score,
                    triage_json: opt_json_to_map(triage_json)?,
                    summary_json: opt_json_to_map(summary_json)?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Provider calls / budget resets
    // ------------------------------------------------------------------

    pub fn insert_provider_call(&self, call: &ProviderCall) -> StorageResult<()> {
        let status = match call.status {
            CallStatus::Ok => "ok",
            CallStatus::Error => "error",
        };
        self.lock().execute(
            "INSERT INTO provider_calls (id, user_id, purpose, provider, model, input_tokens, output_tokens,
                cost_estimate_credits, meta, started_at, ended_at, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                call.id,
                call.user_id,
                call.purpose,
                call.provider,
                call.model,
                call.input_tokens,
                call.output_tokens,
                call.cost_estimate_credits,
                map_to_json(&call.meta),
                to_rfc3339(call.started_at),
                to_rfc3339(call.ended_at),
                status,
                call.error.as_ref().map(map_to_json),
            ],
        )?;
        Ok(())
    }

    /// Sum of `cost_estimate_credits` for `Ok` calls since `since`.
    pub fn sum_provider_call_credits(&self, user_id: &str, since: DateTime<Utc>) -> StorageResult<f64> {
        let sum: Option<f64> = self.lock().query_row(
            "SELECT SUM(cost_estimate_credits) FROM provider_calls WHERE user_id = ?1 AND status = 'ok' AND started_at >= ?2",
            params![user_id, to_rfc3339(since)],
            |r| r.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }

    pub fn count_provider_calls(&self, user_id: &str, purpose: &str, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM provider_calls WHERE user_id = ?1 AND purpose = ?2 AND started_at >= ?3",
            params![user_id, purpose, to_rfc3339(since)],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn insert_budget_reset(&self, reset: &BudgetReset) -> StorageResult<()> {
        let period = match reset.period {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Monthly => "monthly",
        };
        self.lock().execute(
            "INSERT INTO budget_resets (id, user_id, period, credits_at_reset, reset_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![reset.id, reset.user_id, period, reset.credits_at_reset, to_rfc3339(reset.reset_at)],
        )?;
        Ok(())
    }

    pub fn sum_budget_resets(
        &self,
        user_id: &str,
        period: BudgetPeriod,
        since: DateTime<Utc>,
    ) -> StorageResult<f64> {
        let period_str = match period {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Monthly => "monthly",
        };
        let sum: Option<f64> = self.lock().query_row(
            "SELECT SUM(credits_at_reset) FROM budget_resets WHERE user_id = ?1 AND period = ?2 AND reset_at >= ?3",
            params![user_id, period_str, to_rfc3339(since)],
            |r| r.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Fetch runs
    // ------------------------------------------------------------------

    pub fn open_fetch_run(
        &self,
        source_id: &str,
        started_at: DateTime<Utc>,
        cursor_in: &JsonMap,
    ) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        self.lock().execute(
            "INSERT INTO fetch_runs (id, source_id, started_at, cursor_in) VALUES (?1, ?2, ?3, ?4)",
            params![id, source_id, to_rfc3339(started_at), map_to_json(cursor_in)],
        )?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finalize_fetch_run(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        status: FetchRunStatus,
        counts: FetchRunCounts,
        cursor_out: Option<&JsonMap>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let status_str = match status {
            FetchRunStatus::Ok => "ok",
            FetchRunStatus::Partial => "partial",
            FetchRunStatus::Error => "error",
            FetchRunStatus::Skipped => "skipped",
        };
        self.lock().execute(
            "UPDATE fetch_runs SET ended_at = ?1, status = ?2, cursor_out = ?3,
                fetched = ?4, normalized = ?5, upserted = ?6, errors = ?7, error = ?8
             WHERE id = ?9",
            params![
                to_rfc3339(ended_at),
                status_str,
                cursor_out.map(map_to_json),
                counts.fetched as i64,
                counts.normalized as i64,
                counts.upserted as i64,
                counts.errors as i64,
                error,
                id,
            ],
        )?;
        Ok(())
    }
}

struct RawContentItemRow {
    id: String,
    user_id: String,
    source_id: String,
    source_type: String,
    external_id: Option<String>,
    canonical_url: Option<String>,
    title: Option<String>,
    body_text: Option<String>,
    author: Option<String>,
    published_at: Option<String>,
    fetched_at: String,
    metadata: String,
    raw: String,
    hash_url: Option<String>,
    hash_text: Option<String>,
    duplicate_of_content_item_id: Option<String>,
    deleted_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JsonMap;

    fn storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_content_item_keyed_by_source_and_external_id() {
        let store = storage();
        store.upsert_user(&User::new("u1")).unwrap();
        store
            .upsert_topic(&Topic {
                id: "t1".into(),
                user_id: "u1".into(),
                name: "rust".into(),
                digest_schedule_enabled: true,
                digest_interval_minutes: 60,
                digest_mode: DigestMode::Normal,
                digest_depth: 20,
                digest_cursor_end: None,
                decay_hours: None,
            })
            .unwrap();
        store
            .upsert_source(&Source {
                id: "s1".into(),
                user_id: "u1".into(),
                topic_id: "t1".into(),
                source_type: "rss".into(),
                name: "feed".into(),
                config: JsonMap::new(),
                cursor: JsonMap::new(),
                is_enabled: true,
                weight: None,
            })
            .unwrap();

        let draft = ContentItemDraft {
            source_type: "rss".into(),
            external_id: Some("ext-1".into()),
            title: Some("hello".into()),
            ..Default::default()
        };
        let (id1, inserted1) = store
            .upsert_content_item_draft("u1", "s1", "rss", &draft, Utc::now())
            .unwrap();
        assert!(inserted1);

        let draft2 = ContentItemDraft {
            title: Some("hello updated".into()),
            ..draft
        };
        let (id2, inserted2) = store
            .upsert_content_item_draft("u1", "s1", "rss", &draft2, Utc::now())
            .unwrap();
        assert_eq!(id1, id2);
        assert!(!inserted2);

        let item = store.get_content_item(&id1).unwrap().unwrap();
        assert_eq!(item.title.as_deref(), Some("hello updated"));
    }

    #[test]
    fn cluster_item_unique_per_content_item() {
        let store = storage();
        store.upsert_user(&User::new("u1")).unwrap();
        let cluster = Cluster {
            id: "c1".into(),
            user_id: "u1".into(),
            representative_content_item_id: None,
            centroid_vector: vec![1.0, 0.0],
            updated_at: Utc::now(),
            member_count: 0,
        };
        store
            .upsert_topic(&Topic {
                id: "t1".into(),
                user_id: "u1".into(),
                name: "rust".into(),
                digest_schedule_enabled: true,
                digest_interval_minutes: 60,
                digest_mode: DigestMode::Normal,
                digest_depth: 20,
                digest_cursor_end: None,
                decay_hours: None,
            })
            .unwrap();
        store.create_cluster("u1", "t1", &cluster).unwrap();

        let item = ClusterItem {
            cluster_id: "c1".into(),
            content_item_id: "ci1".into(),
            similarity: 0.9,
        };
        assert!(store.insert_cluster_item(&item).unwrap());
        assert!(!store.insert_cluster_item(&item).unwrap());
    }
}
