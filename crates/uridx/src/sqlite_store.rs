//! SQLite-backed [`Store`] implementation.
//!
//! Sources, tags, chunks and vectors live in separate tables (see
//! [`crate::migrate`]). Staged chunk rows carry `state = 'staged'` and are
//! filtered out of every read; `commit_chunks` swaps them in and writes the
//! source metadata within one transaction. A source row created by
//! `upsert_source` keeps `pending = 1` until that first commit. The index
//! dimension and embedding model are kept in the `settings` table.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};

use uridx_core::embedding::{blob_to_vec, vec_to_blob};
use uridx_core::models::{Chunk, ChunkDraft, ChunkId, Source, SourceFilter, SourceId, SourceMetadata};
use uridx_core::stats::IndexStats;
use uridx_core::store::{plan_diff, Candidate, ChunkChange, ChunkDiff, DiffPolicy, EmbeddingSlot, Store};
use uridx_core::{Error, Result};

use crate::{db, migrate};

const DIMENSION_KEY: &str = "embed_dimension";
const MODEL_KEY: &str = "embed_model";
const TAG_SEPARATOR: char = '\u{1f}';

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record the embedding model used by this index. The first recorded
    /// name sticks; a different name later is returned so the caller can
    /// warn about it.
    pub async fn record_model(&self, model: &str) -> Result<Option<String>> {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
            .bind(MODEL_KEY)
            .bind(model)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        let stored = self.setting(MODEL_KEY).await?;
        Ok(stored.filter(|s| s != model))
    }

    /// The embedding model recorded for this index, if any.
    pub async fn model(&self) -> Result<Option<String>> {
        self.setting(MODEL_KEY).await
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(n.max(0) as u64)
    }

    async fn grouped(&self, sql: &str) -> Result<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(rows.into_iter().map(|(k, n)| (k, n.max(0) as u64)).collect())
    }
}

fn parse_dimension(value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::storage(format!("corrupt {DIMENSION_KEY} setting: {value:?}")))
}

fn row_to_source(row: &SqliteRow, tags: BTreeSet<String>) -> Source {
    Source {
        id: row.get("id"),
        uri: row.get("uri"),
        title: row.get("title"),
        source_type: row.get("source_type"),
        tags,
        context: row.get("context"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn load_tags(conn: &mut SqliteConnection, source_id: SourceId) -> Result<BTreeSet<String>> {
    let tags: Vec<String> = sqlx::query_scalar("SELECT tag FROM source_tags WHERE source_id = ?")
        .bind(source_id)
        .fetch_all(conn)
        .await
        .map_err(Error::storage)?;
    Ok(tags.into_iter().collect())
}

async fn write_tags(
    conn: &mut SqliteConnection,
    source_id: SourceId,
    tags: &BTreeSet<String>,
) -> Result<()> {
    sqlx::query("DELETE FROM source_tags WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    for tag in tags {
        sqlx::query("INSERT INTO source_tags (source_id, tag) VALUES (?, ?)")
            .bind(source_id)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .map_err(Error::storage)?;
    }
    Ok(())
}

async fn write_metadata(
    conn: &mut SqliteConnection,
    source_id: SourceId,
    metadata: &SourceMetadata,
) -> Result<()> {
    sqlx::query("UPDATE sources SET title = ?, source_type = ?, context = ? WHERE id = ?")
        .bind(&metadata.title)
        .bind(&metadata.source_type)
        .bind(&metadata.context)
        .bind(source_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    write_tags(conn, source_id, &metadata.tags).await
}

async fn fixed_dimension(conn: &mut SqliteConnection) -> Result<Option<usize>> {
    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(DIMENSION_KEY)
        .fetch_optional(conn)
        .await
        .map_err(Error::storage)?;
    stored.as_deref().map(parse_dimension).transpose()
}

async fn delete_staged(conn: &mut SqliteConnection, source_id: SourceId) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunk_embeddings WHERE chunk_id IN \
         (SELECT id FROM chunks WHERE source_id = ? AND state = 'staged')",
    )
    .bind(source_id)
    .execute(&mut *conn)
    .await
    .map_err(Error::storage)?;
    sqlx::query("DELETE FROM chunks WHERE source_id = ? AND state = 'staged'")
        .bind(source_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    Ok(())
}

const SOURCE_COLUMNS: &str = "id, uri, title, source_type, context, pending, created_at, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_source(&self, uri: &str, metadata: &SourceMetadata) -> Result<SourceId> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let existing: Option<(SourceId, bool)> =
            sqlx::query_as("SELECT id, pending FROM sources WHERE uri = ?")
                .bind(uri)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::storage)?;

        let id = match existing {
            // Committed metadata only changes in commit_chunks.
            Some((id, false)) => id,
            Some((id, true)) => {
                write_metadata(&mut tx, id, metadata).await?;
                id
            }
            None => {
                let id = sqlx::query(
                    "INSERT INTO sources (uri, title, source_type, context, pending, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, 1, ?, ?)",
                )
                .bind(uri)
                .bind(&metadata.title)
                .bind(&metadata.source_type)
                .bind(&metadata.context)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?
                .last_insert_rowid();
                write_tags(&mut tx, id, &metadata.tags).await?;
                id
            }
        };

        tx.commit().await.map_err(Error::storage)?;
        Ok(id)
    }

    async fn get_source(&self, uri: &str) -> Result<Option<Source>> {
        let mut conn = self.pool.acquire().await.map_err(Error::storage)?;
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE uri = ? AND pending = 0"
        ))
        .bind(uri)
        .fetch_optional(&mut *conn)
        .await
        .map_err(Error::storage)?;
        match row {
            Some(row) => {
                let tags = load_tags(&mut conn, row.get("id")).await?;
                Ok(Some(row_to_source(&row, tags)))
            }
            None => Ok(None),
        }
    }

    async fn replace_chunks(
        &self,
        source_id: SourceId,
        drafts: &[ChunkDraft],
        policy: DiffPolicy,
    ) -> Result<ChunkDiff> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::storage)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("source id {source_id}")));
        }

        delete_staged(&mut tx, source_id).await?;

        let live: Vec<(i64, String)> = sqlx::query_as(
            "SELECT sequence_index, content_hash FROM chunks \
             WHERE source_id = ? AND state = 'live' ORDER BY sequence_index",
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::storage)?;

        let plan = plan_diff(&live, drafts, policy)?;
        let mut diff = ChunkDiff {
            source_id,
            chunk_count: drafts.len(),
            unchanged: plan.unchanged,
            deleted: plan.deleted,
            ..Default::default()
        };

        for (draft, change) in plan.stage {
            let chunk_id = sqlx::query(
                "INSERT INTO chunks (source_id, sequence_index, text, content_hash, state) \
                 VALUES (?, ?, ?, ?, 'staged')",
            )
            .bind(source_id)
            .bind(draft.sequence_index)
            .bind(&draft.text)
            .bind(&draft.content_hash)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?
            .last_insert_rowid();

            match change {
                ChunkChange::Created => diff.created += 1,
                ChunkChange::Updated => diff.updated += 1,
            }
            diff.to_embed.push(EmbeddingSlot {
                chunk_id,
                sequence_index: draft.sequence_index,
                text: draft.text.clone(),
                change,
            });
        }

        tx.commit().await.map_err(Error::storage)?;
        Ok(diff)
    }

    async fn write_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidArgument("empty embedding vector".into()));
        }
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let source_id: Option<SourceId> =
            sqlx::query_scalar("SELECT source_id FROM chunks WHERE id = ?")
                .bind(chunk_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::storage)?;
        let Some(source_id) = source_id else {
            return Err(Error::NotFound(format!("chunk {chunk_id}")));
        };

        // Before the first commit, vectors staged for one source must agree.
        let expected = match fixed_dimension(&mut tx).await? {
            Some(dim) => Some(dim),
            None => {
                let staged: Option<i64> = sqlx::query_scalar(
                    "SELECT length(e.vector) / 4 FROM chunk_embeddings e \
                     JOIN chunks c ON c.id = e.chunk_id \
                     WHERE c.source_id = ? AND c.state = 'staged' AND c.id != ? LIMIT 1",
                )
                .bind(source_id)
                .bind(chunk_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::storage)?;
                staged.map(|n| n.max(0) as usize)
            }
        };
        if let Some(expected) = expected {
            if expected != vector.len() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        sqlx::query(
            "INSERT INTO chunk_embeddings (chunk_id, vector) VALUES (?, ?) \
             ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector",
        )
        .bind(chunk_id)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)
    }

    async fn commit_chunks(
        &self,
        source_id: SourceId,
        metadata: &SourceMetadata,
        diff: &ChunkDiff,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let count = i64::try_from(diff.chunk_count).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"))
            .bind(source_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let Some(row) = row else {
            return Err(Error::NotFound(format!("source id {source_id}")));
        };
        let was_pending: bool = row.get("pending");
        let tags = load_tags(&mut tx, source_id).await?;
        let changed = row_to_source(&row, tags).metadata() != *metadata;

        let missing: Option<i64> = sqlx::query_scalar(
            "SELECT c.id FROM chunks c LEFT JOIN chunk_embeddings e ON e.chunk_id = c.id \
             WHERE c.source_id = ? AND c.state = 'staged' AND e.chunk_id IS NULL LIMIT 1",
        )
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::storage)?;
        if let Some(id) = missing {
            return Err(Error::InvalidArgument(format!(
                "staged chunk {id} has no embedding"
            )));
        }

        let staged_dims: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT length(e.vector) / 4 FROM chunks c \
             JOIN chunk_embeddings e ON e.chunk_id = c.id \
             WHERE c.source_id = ? AND c.state = 'staged' ORDER BY 1",
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::storage)?;
        if let [first, second, ..] = staged_dims[..] {
            return Err(Error::DimensionMismatch {
                expected: first.max(0) as usize,
                actual: second.max(0) as usize,
            });
        }
        if let Some(&dim) = staged_dims.first() {
            let dim = dim.max(0) as usize;
            // Only the first commit that carries vectors inserts the setting.
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                .bind(DIMENSION_KEY)
                .bind(dim.to_string())
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;
            let expected = fixed_dimension(&mut tx).await?.unwrap_or(dim);
            if expected != dim {
                // Dropping the transaction rolls it back.
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: dim,
                });
            }
        }

        let superseded = "SELECT id FROM chunks WHERE source_id = ?1 AND state = 'live' \
             AND (sequence_index >= ?2 OR sequence_index IN \
                 (SELECT sequence_index FROM chunks WHERE source_id = ?1 AND state = 'staged'))";
        sqlx::query(&format!(
            "DELETE FROM chunk_embeddings WHERE chunk_id IN ({superseded})"
        ))
        .bind(source_id)
        .bind(count)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;
        sqlx::query(&format!("DELETE FROM chunks WHERE id IN ({superseded})"))
            .bind(source_id)
            .bind(count)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;

        sqlx::query("UPDATE chunks SET state = 'live' WHERE source_id = ? AND state = 'staged'")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;

        if was_pending || changed {
            write_metadata(&mut tx, source_id, metadata).await?;
            sqlx::query("UPDATE sources SET pending = 0 WHERE id = ?")
                .bind(source_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;
        }
        if !was_pending && (changed || diff.has_changes()) {
            sqlx::query("UPDATE sources SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(source_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;
        }

        tx.commit().await.map_err(Error::storage)
    }

    async fn discard_staged(&self, source_id: SourceId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        delete_staged(&mut tx, source_id).await?;
        tx.commit().await.map_err(Error::storage)
    }

    async fn scan_page(
        &self,
        filter: &SourceFilter,
        after: Option<ChunkId>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.id, c.sequence_index, c.text, e.vector, \
                    s.uri, s.title, s.source_type, s.updated_at, \
                    (SELECT group_concat(t.tag, char(31)) FROM source_tags t \
                     WHERE t.source_id = s.id) AS tags \
             FROM chunks c \
             JOIN sources s ON s.id = c.source_id \
             JOIN chunk_embeddings e ON e.chunk_id = c.id \
             WHERE c.state = 'live' AND s.pending = 0",
        );
        if let Some(after) = after {
            qb.push(" AND c.id > ").push_bind(after);
        }
        if let Some(source_type) = &filter.source_type {
            qb.push(" AND s.source_type = ").push_bind(source_type.clone());
        }
        if let Some(prefix) = &filter.uri_prefix {
            qb.push(" AND substr(s.uri, 1, length(")
                .push_bind(prefix.clone())
                .push(")) = ")
                .push_bind(prefix.clone());
        }
        for tag in &filter.tags {
            qb.push(" AND EXISTS (SELECT 1 FROM source_tags ft WHERE ft.source_id = s.id AND ft.tag = ")
                .push_bind(tag.clone())
                .push(")");
        }
        qb.push(" ORDER BY c.id ASC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let tags: Option<String> = row.get("tags");
                let mut tags: Vec<String> = tags
                    .map(|t| t.split(TAG_SEPARATOR).map(str::to_string).collect())
                    .unwrap_or_default();
                tags.sort();
                Candidate {
                    chunk_id: row.get("id"),
                    sequence_index: row.get("sequence_index"),
                    text: row.get("text"),
                    source_uri: row.get("uri"),
                    title: row.get("title"),
                    source_type: row.get("source_type"),
                    tags,
                    updated_at: row.get("updated_at"),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn delete_source(&self, uri: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let row: Option<(SourceId, bool)> =
            sqlx::query_as("SELECT id, pending FROM sources WHERE uri = ?")
                .bind(uri)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::storage)?;
        let Some((id, pending)) = row else {
            return Ok(false);
        };

        for statement in [
            "DELETE FROM chunk_embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE source_id = ?)",
            "DELETE FROM chunks WHERE source_id = ?",
            "DELETE FROM source_tags WHERE source_id = ?",
            "DELETE FROM sources WHERE id = ?",
        ] {
            sqlx::query(statement)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;
        }

        tx.commit().await.map_err(Error::storage)?;
        Ok(!pending)
    }

    async fn live_chunks(&self, source_id: SourceId) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, source_id, sequence_index, text, content_hash FROM chunks \
             WHERE source_id = ? AND state = 'live' ORDER BY sequence_index ASC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                source_id: row.get("source_id"),
                sequence_index: row.get("sequence_index"),
                text: row.get("text"),
                content_hash: row.get("content_hash"),
            })
            .collect())
    }

    async fn index_dimension(&self) -> Result<Option<usize>> {
        self.setting(DIMENSION_KEY)
            .await?
            .as_deref()
            .map(parse_dimension)
            .transpose()
    }

    async fn stats(&self) -> Result<IndexStats> {
        let by_tag = self
            .grouped(
                "SELECT t.tag, COUNT(*) FROM source_tags t JOIN sources s ON s.id = t.source_id \
                 WHERE s.pending = 0 GROUP BY t.tag",
            )
            .await?;
        Ok(IndexStats {
            sources: self
                .count("SELECT COUNT(*) FROM sources WHERE pending = 0")
                .await?,
            chunks: self
                .count("SELECT COUNT(*) FROM chunks WHERE state = 'live'")
                .await?,
            embedded_chunks: self
                .count(
                    "SELECT COUNT(*) FROM chunks c JOIN chunk_embeddings e ON e.chunk_id = c.id \
                     WHERE c.state = 'live'",
                )
                .await?,
            tags: by_tag.len() as u64,
            by_source_type: self
                .grouped(
                    "SELECT source_type, COUNT(*) FROM sources WHERE pending = 0 \
                     GROUP BY source_type",
                )
                .await?,
            by_tag,
            dimension: self.index_dimension().await?,
            model: self.setting(MODEL_KEY).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uridx_core::chunk::drafts_from_texts;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("t.db")).await.unwrap();
        (dir, store)
    }

    fn meta(title: Option<&str>, tags: &[&str]) -> SourceMetadata {
        SourceMetadata {
            title: title.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn write_all(store: &SqliteStore, uri: &str, texts: &[&str], dim: usize) -> ChunkDiff {
        let md = meta(None, &[]);
        let id = store.upsert_source(uri, &md).await.unwrap();
        let diff = store
            .replace_chunks(id, &drafts_from_texts(texts.iter().copied()), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        for slot in &diff.to_embed {
            store.write_embedding(slot.chunk_id, &vec![0.5; dim]).await.unwrap();
        }
        store.commit_chunks(id, &md, &diff).await.unwrap();
        diff
    }

    #[tokio::test]
    async fn metadata_lands_at_commit() {
        let (_dir, store) = store().await;
        let mut first = meta(Some("A"), &["y", "x"]);
        first.context = Some("{\"path\":\"a.md\"}".into());
        let id = store.upsert_source("note://a", &first).await.unwrap();
        let diff = store
            .replace_chunks(id, &drafts_from_texts(["one"]), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        store.write_embedding(diff.to_embed[0].chunk_id, &[1.0, 0.0]).await.unwrap();
        store.commit_chunks(id, &first, &diff).await.unwrap();

        let source = store.get_source("note://a").await.unwrap().unwrap();
        assert_eq!(source.id, id);
        assert_eq!(source.title.as_deref(), Some("A"));
        assert_eq!(source.tags.iter().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(source.context.as_deref(), Some("{\"path\":\"a.md\"}"));

        let second = meta(Some("B"), &["z"]);
        let again = store.upsert_source("note://a", &second).await.unwrap();
        assert_eq!(again, id);
        assert_eq!(store.get_source("note://a").await.unwrap().unwrap(), source);

        let diff = store
            .replace_chunks(id, &drafts_from_texts(["one"]), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        assert!(diff.to_embed.is_empty());
        store.commit_chunks(id, &second, &diff).await.unwrap();
        let source = store.get_source("note://a").await.unwrap().unwrap();
        assert_eq!(source.title.as_deref(), Some("B"));
        assert_eq!(source.tags.iter().collect::<Vec<_>>(), vec!["z"]);
        assert_eq!(source.context, None);
    }

    #[tokio::test]
    async fn pending_source_is_hidden_until_commit() {
        let (_dir, store) = store().await;
        let id = store
            .upsert_source("note://p", &meta(Some("P"), &["t"]))
            .await
            .unwrap();
        assert!(store.get_source("note://p").await.unwrap().is_none());
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.sources, stats.tags), (0, 0));

        // A second upsert of a pending row reuses it.
        let again = store.upsert_source("note://p", &meta(None, &[])).await.unwrap();
        assert_eq!(again, id);

        assert!(!store.delete_source("note://p").await.unwrap());
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn staged_rows_hidden_until_commit() {
        let (_dir, store) = store().await;
        let id = store.upsert_source("note://a", &meta(None, &[])).await.unwrap();
        let diff = store
            .replace_chunks(id, &drafts_from_texts(["one", "two"]), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        for slot in &diff.to_embed {
            store.write_embedding(slot.chunk_id, &[1.0, 0.0]).await.unwrap();
        }
        assert!(store
            .scan_page(&SourceFilter::default(), None, 10)
            .await
            .unwrap()
            .is_empty());
        store.commit_chunks(id, &meta(None, &[]), &diff).await.unwrap();
        assert_eq!(store.live_chunks(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn partial_update_keeps_unchanged_rows() {
        let (_dir, store) = store().await;
        write_all(&store, "note://a", &["a", "b", "c"], 2).await;
        let id = store.get_source("note://a").await.unwrap().unwrap().id;
        let before = store.live_chunks(id).await.unwrap();

        let diff = write_all(&store, "note://a", &["a", "B"], 2).await;
        assert_eq!((diff.unchanged, diff.updated, diff.deleted), (1, 1, 1));
        let after = store.live_chunks(id).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1].id, before[1].id);
        assert_eq!(store.stats().await.unwrap().embedded_chunks, 2);
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_commit() {
        let (_dir, store) = store().await;

        // A vector that never gets committed leaves the dimension open.
        let id = store.upsert_source("note://x", &meta(None, &[])).await.unwrap();
        let diff = store
            .replace_chunks(id, &drafts_from_texts(["x", "y"]), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        store.write_embedding(diff.to_embed[0].chunk_id, &[1.0; 5]).await.unwrap();
        let err = store
            .write_embedding(diff.to_embed[1].chunk_id, &[1.0; 6])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 5, actual: 6 }));
        assert_eq!(store.index_dimension().await.unwrap(), None);
        store.discard_staged(id).await.unwrap();
        store.delete_source("note://x").await.unwrap();

        write_all(&store, "note://a", &["a"], 3).await;
        assert_eq!(store.index_dimension().await.unwrap(), Some(3));

        let id = store.upsert_source("note://b", &meta(None, &[])).await.unwrap();
        let diff = store
            .replace_chunks(id, &drafts_from_texts(["b"]), DiffPolicy::ByContentHash)
            .await
            .unwrap();
        let err = store
            .write_embedding(diff.to_embed[0].chunk_id, &[1.0; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 4 }));
        assert_eq!(store.index_dimension().await.unwrap(), Some(3));
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_embeddings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(embedded, 1);
    }

    async fn uris(store: &SqliteStore, filter: SourceFilter) -> Vec<String> {
        let mut uris: Vec<String> = store
            .scan_page(&filter, None, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.source_uri)
            .collect();
        uris.sort();
        uris
    }

    #[tokio::test]
    async fn scan_filters_by_tag_type_and_prefix() {
        let (_dir, store) = store().await;
        let specs = [
            ("note://a", "note", vec!["x", "y"]),
            ("note://b", "note", vec!["y"]),
            ("chat://c", "chat", vec!["x"]),
        ];
        for (uri, ty, tags) in &specs {
            let md = SourceMetadata {
                title: None,
                source_type: ty.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                context: None,
            };
            let id = store.upsert_source(uri, &md).await.unwrap();
            let diff = store
                .replace_chunks(id, &drafts_from_texts(["t"]), DiffPolicy::ByContentHash)
                .await
                .unwrap();
            store.write_embedding(diff.to_embed[0].chunk_id, &[1.0]).await.unwrap();
            store.commit_chunks(id, &md, &diff).await.unwrap();
        }

        let tagged_x = SourceFilter {
            tags: vec!["x".into()],
            ..Default::default()
        };
        assert_eq!(uris(&store, tagged_x).await, vec!["chat://c", "note://a"]);
        let both = SourceFilter {
            tags: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        assert_eq!(uris(&store, both).await, vec!["note://a"]);
        let chats = SourceFilter {
            source_type: Some("chat".into()),
            ..Default::default()
        };
        assert_eq!(uris(&store, chats).await, vec!["chat://c"]);
        let notes = SourceFilter {
            uri_prefix: Some("note://".into()),
            ..Default::default()
        };
        assert_eq!(uris(&store, notes).await, vec!["note://a", "note://b"]);

        let page = store
            .scan_page(&SourceFilter::default(), None, 100)
            .await
            .unwrap();
        let a = page.iter().find(|c| c.source_uri == "note://a").unwrap();
        assert_eq!(a.tags, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks_and_vectors() {
        let (_dir, store) = store().await;
        write_all(&store, "note://a", &["a", "b"], 2).await;
        assert!(store.delete_source("note://a").await.unwrap());
        assert!(!store.delete_source("note://a").await.unwrap());
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.sources, stats.chunks, stats.embedded_chunks), (0, 0, 0));
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_embeddings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(vectors, 0);
    }

    #[tokio::test]
    async fn model_is_recorded_once() {
        let (_dir, store) = store().await;
        assert_eq!(store.record_model("nomic-embed-text").await.unwrap(), None);
        assert_eq!(store.record_model("nomic-embed-text").await.unwrap(), None);
        assert_eq!(
            store.record_model("mxbai-embed-large").await.unwrap().as_deref(),
            Some("nomic-embed-text")
        );
        assert_eq!(
            store.stats().await.unwrap().model.as_deref(),
            Some("nomic-embed-text")
        );
    }
}
