//! Idempotent schema migrations.
//!
//! Every statement uses `IF NOT EXISTS`, so running them on each open (and
//! again via `uridx init`) is safe.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uri TEXT NOT NULL UNIQUE,
        title TEXT,
        source_type TEXT NOT NULL DEFAULT 'note',
        context TEXT,
        -- Set until the first commit; pending rows are invisible to readers.
        pending INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_tags (
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        PRIMARY KEY (source_id, tag)
    )
    "#,
    // `state` is 'live' or 'staged'. Staged rows belong to an ingestion in
    // flight and are invisible to readers until commit.
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        sequence_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'live' CHECK (state IN ('live', 'staged')),
        UNIQUE (source_id, sequence_index, state)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_embeddings (
        chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
        vector BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id, state)",
    "CREATE INDEX IF NOT EXISTS idx_source_tags_tag ON source_tags(tag)",
    "CREATE INDEX IF NOT EXISTS idx_sources_type ON sources(source_type)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply schema migration")?;
    }
    Ok(())
}
