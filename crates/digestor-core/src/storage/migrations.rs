//! Database Migrations
//!
//! Numbered, forward-only schema migrations applied in order at `Storage`
//! construction.

/// Migration definitions, applied in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: users, topics, sources, content items, embeddings, clusters, digests, accounting",
    up: MIGRATION_V1_UP,
}];

/// A single forward database migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    digest_schedule_enabled INTEGER NOT NULL DEFAULT 1,
    digest_interval_minutes INTEGER NOT NULL,
    digest_mode TEXT NOT NULL DEFAULT 'normal',
    digest_depth INTEGER NOT NULL DEFAULT 20,
    digest_cursor_end TEXT,
    decay_hours REAL,
    UNIQUE(user_id, name)
);

CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    topic_id TEXT NOT NULL REFERENCES topics(id),
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    cursor TEXT NOT NULL DEFAULT '{}',
    is_enabled INTEGER NOT NULL DEFAULT 1,
    weight REAL,
    UNIQUE(user_id, name)
);

CREATE INDEX IF NOT EXISTS idx_sources_topic ON sources(topic_id);

CREATE TABLE IF NOT EXISTS content_items (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    source_id TEXT NOT NULL REFERENCES sources(id),
    source_type TEXT NOT NULL,
    external_id TEXT,
    canonical_url TEXT,
    title TEXT,
    body_text TEXT,
    author TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    raw TEXT NOT NULL DEFAULT '{}',
    hash_url TEXT,
    hash_text TEXT,
    duplicate_of_content_item_id TEXT REFERENCES content_items(id),
    deleted_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_content_items_source_external
    ON content_items(source_id, external_id) WHERE external_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_content_items_user_hash_url
    ON content_items(user_id, hash_url) WHERE hash_url IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_content_items_source ON content_items(source_id);
CREATE INDEX IF NOT EXISTS idx_content_items_published ON content_items(published_at);
CREATE INDEX IF NOT EXISTS idx_content_items_dup ON content_items(duplicate_of_content_item_id);

CREATE TABLE IF NOT EXISTS content_item_sources (
    content_item_id TEXT NOT NULL REFERENCES content_items(id),
    source_id TEXT NOT NULL REFERENCES sources(id),
    added_at TEXT NOT NULL,
    PRIMARY KEY (content_item_id, source_id)
);

CREATE TABLE IF NOT EXISTS embeddings (
    content_item_id TEXT PRIMARY KEY REFERENCES content_items(id),
    model TEXT NOT NULL,
    dims INTEGER NOT NULL,
    vector TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clusters (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    topic_id TEXT NOT NULL REFERENCES topics(id),
    representative_content_item_id TEXT,
    centroid_vector TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_clusters_topic_updated ON clusters(topic_id, updated_at);

CREATE TABLE IF NOT EXISTS cluster_items (
    cluster_id TEXT NOT NULL REFERENCES clusters(id),
    content_item_id TEXT NOT NULL UNIQUE REFERENCES content_items(id),
    similarity REAL NOT NULL,
    PRIMARY KEY (cluster_id, content_item_id)
);

CREATE TABLE IF NOT EXISTS topic_preference_profiles (
    user_id TEXT NOT NULL REFERENCES users(id),
    topic_id TEXT NOT NULL REFERENCES topics(id),
    positive_vector TEXT,
    negative_vector TEXT,
    positive_count INTEGER NOT NULL DEFAULT 0,
    negative_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, topic_id)
);

CREATE TABLE IF NOT EXISTS feedback_events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    content_item_id TEXT NOT NULL REFERENCES content_items(id),
    digest_id TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_content_item ON feedback_events(content_item_id);

CREATE TABLE IF NOT EXISTS digests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    topic_id TEXT NOT NULL REFERENCES topics(id),
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    mode TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, topic_id, window_start, window_end, mode)
);

CREATE TABLE IF NOT EXISTS digest_items (
    digest_id TEXT NOT NULL REFERENCES digests(id),
    rank INTEGER NOT NULL,
    cluster_id TEXT,
    content_item_id TEXT,
    score REAL NOT NULL,
    triage_json TEXT,
    summary_json TEXT,
    PRIMARY KEY (digest_id, rank)
);

CREATE TABLE IF NOT EXISTS provider_calls (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    purpose TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_estimate_credits REAL NOT NULL DEFAULT 0,
    meta TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_provider_calls_user_time ON provider_calls(user_id, started_at);

CREATE TABLE IF NOT EXISTS budget_resets (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    period TEXT NOT NULL,
    credits_at_reset REAL NOT NULL,
    reset_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_budget_resets_user_time ON budget_resets(user_id, reset_at);

CREATE TABLE IF NOT EXISTS fetch_runs (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id),
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT,
    cursor_in TEXT NOT NULL DEFAULT '{}',
    cursor_out TEXT,
    fetched INTEGER NOT NULL DEFAULT 0,
    normalized INTEGER NOT NULL DEFAULT 0,
    upserted INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_fetch_runs_source ON fetch_runs(source_id);
"#;
