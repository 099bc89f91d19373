//! In-memory [`Store`] for tests and embedding the index in other tools.
//!
//! All state sits behind one `RwLock`, so every trait method is a single
//! lock section and `commit_chunks` is atomic with respect to scans.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{plan_diff, Candidate, ChunkChange, ChunkDiff, DiffPolicy, EmbeddingSlot, Store};
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkDraft, ChunkId, Source, SourceFilter, SourceId, SourceMetadata};
use crate::stats::IndexStats;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

struct StoredChunk {
    chunk: Chunk,
    staged: bool,
}

#[derive(Default)]
struct Inner {
    next_source_id: SourceId,
    next_chunk_id: ChunkId,
    sources: BTreeMap<SourceId, Source>,
    by_uri: HashMap<String, SourceId>,
    // Created but never committed.
    pending: HashSet<SourceId>,
    // Ordered by id so scans can page with a keyset cursor.
    chunks: BTreeMap<ChunkId, StoredChunk>,
    vectors: HashMap<ChunkId, Vec<f32>>,
    dimension: Option<usize>,
}

impl Inner {
    fn remove_chunk(&mut self, id: ChunkId) {
        self.chunks.remove(&id);
        self.vectors.remove(&id);
    }

    fn committed(&self, id: SourceId) -> Option<&Source> {
        if self.pending.contains(&id) {
            return None;
        }
        self.sources.get(&id)
    }

    /// Length shared by the vectors staged for `source_id`, or `None` if
    /// none are staged. Differing lengths are a mismatch.
    fn staged_dimension(&self, source_id: SourceId, skip: Option<ChunkId>) -> Result<Option<usize>> {
        let mut dimension = None;
        for id in self.chunk_ids_where(source_id, |c| c.staged) {
            if Some(id) == skip {
                continue;
            }
            let Some(v) = self.vectors.get(&id) else { continue };
            match dimension {
                None => dimension = Some(v.len()),
                Some(d) if d != v.len() => {
                    return Err(Error::DimensionMismatch {
                        expected: d,
                        actual: v.len(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(dimension)
    }

    fn chunk_ids_where(&self, source_id: SourceId, pred: impl Fn(&StoredChunk) -> bool) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.chunk.source_id == source_id && pred(c))
            .map(|(id, _)| *id)
            .collect()
    }
}

pub struct InMemoryStore {
    inner: RwLock<Inner>,
    clock: Clock,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(|| chrono::Utc::now().timestamp())
    }

    /// Use a custom source of Unix-second timestamps.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        Self {
            inner: RwLock::new(Inner {
                next_source_id: 1,
                next_chunk_id: 1,
                ..Default::default()
            }),
            clock: Arc::new(clock),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::storage("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::storage("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_metadata(source: &mut Source, metadata: &SourceMetadata) {
    source.title = metadata.title.clone();
    source.source_type = metadata.source_type.clone();
    source.tags = metadata.tags.clone();
    source.context = metadata.context.clone();
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_source(&self, uri: &str, metadata: &SourceMetadata) -> Result<SourceId> {
        let now = (self.clock)();
        let mut inner = self.write()?;
        if let Some(&id) = inner.by_uri.get(uri) {
            if inner.pending.contains(&id) {
                if let Some(source) = inner.sources.get_mut(&id) {
                    apply_metadata(source, metadata);
                }
            }
            return Ok(id);
        }

        let id = inner.next_source_id;
        inner.next_source_id += 1;
        inner.by_uri.insert(uri.to_string(), id);
        inner.pending.insert(id);
        let mut source = Source {
            id,
            uri: uri.to_string(),
            title: None,
            source_type: String::new(),
            tags: Default::default(),
            context: None,
            created_at: now,
            updated_at: now,
        };
        apply_metadata(&mut source, metadata);
        inner.sources.insert(id, source);
        Ok(id)
    }

    async fn get_source(&self, uri: &str) -> Result<Option<Source>> {
        let inner = self.read()?;
        Ok(inner
            .by_uri
            .get(uri)
            .and_then(|id| inner.committed(*id))
            .cloned())
    }

    async fn replace_chunks(
        &self,
        source_id: SourceId,
        drafts: &[ChunkDraft],
        policy: DiffPolicy,
    ) -> Result<ChunkDiff> {
        let mut inner = self.write()?;
        if !inner.sources.contains_key(&source_id) {
            return Err(Error::NotFound(format!("source id {source_id}")));
        }

        for id in inner.chunk_ids_where(source_id, |c| c.staged) {
            inner.remove_chunk(id);
        }

        let live: Vec<(i64, String)> = inner
            .chunks
            .values()
            .filter(|c| c.chunk.source_id == source_id && !c.staged)
            .map(|c| (c.chunk.sequence_index, c.chunk.content_hash.clone()))
            .collect();
        let plan = plan_diff(&live, drafts, policy)?;

        let mut diff = ChunkDiff {
            source_id,
            chunk_count: drafts.len(),
            unchanged: plan.unchanged,
            deleted: plan.deleted,
            ..Default::default()
        };
        for (draft, change) in plan.stage {
            let id = inner.next_chunk_id;
            inner.next_chunk_id += 1;
            inner.chunks.insert(
                id,
                StoredChunk {
                    chunk: Chunk {
                        id,
                        source_id,
                        sequence_index: draft.sequence_index,
                        text: draft.text.clone(),
                        content_hash: draft.content_hash.clone(),
                    },
                    staged: true,
                },
            );
            match change {
                ChunkChange::Created => diff.created += 1,
                ChunkChange::Updated => diff.updated += 1,
            }
            diff.to_embed.push(EmbeddingSlot {
                chunk_id: id,
                sequence_index: draft.sequence_index,
                text: draft.text.clone(),
                change,
            });
        }
        Ok(diff)
    }

    async fn write_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidArgument("empty embedding vector".into()));
        }
        let mut inner = self.write()?;
        let source_id = inner
            .chunks
            .get(&chunk_id)
            .map(|c| c.chunk.source_id)
            .ok_or_else(|| Error::NotFound(format!("chunk {chunk_id}")))?;
        let expected = match inner.dimension {
            Some(d) => Some(d),
            None => inner.staged_dimension(source_id, Some(chunk_id))?,
        };
        if let Some(expected) = expected.filter(|d| *d != vector.len()) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        inner.vectors.insert(chunk_id, vector.to_vec());
        Ok(())
    }

    async fn commit_chunks(
        &self,
        source_id: SourceId,
        metadata: &SourceMetadata,
        diff: &ChunkDiff,
    ) -> Result<()> {
        let now = (self.clock)();
        let mut inner = self.write()?;
        if !inner.sources.contains_key(&source_id) {
            return Err(Error::NotFound(format!("source id {source_id}")));
        }

        let staged = inner.chunk_ids_where(source_id, |c| c.staged);
        if let Some(id) = staged.iter().find(|id| !inner.vectors.contains_key(*id)) {
            return Err(Error::InvalidArgument(format!(
                "staged chunk {id} has no embedding"
            )));
        }
        let staged_dim = inner.staged_dimension(source_id, None)?;
        match (inner.dimension, staged_dim) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(Error::DimensionMismatch { expected, actual });
            }
            (None, Some(actual)) => inner.dimension = Some(actual),
            _ => {}
        }

        let replaced: Vec<i64> = staged
            .iter()
            .filter_map(|id| inner.chunks.get(id))
            .map(|c| c.chunk.sequence_index)
            .collect();
        let count = diff.chunk_count as i64;
        for id in inner.chunk_ids_where(source_id, |c| {
            !c.staged
                && (c.chunk.sequence_index >= count || replaced.contains(&c.chunk.sequence_index))
        }) {
            inner.remove_chunk(id);
        }
        for id in &staged {
            if let Some(c) = inner.chunks.get_mut(id) {
                c.staged = false;
            }
        }

        let was_pending = inner.pending.remove(&source_id);
        if let Some(source) = inner.sources.get_mut(&source_id) {
            let changed = source.metadata() != *metadata;
            apply_metadata(source, metadata);
            if !was_pending && (changed || diff.has_changes()) {
                source.updated_at = now;
            }
        }
        Ok(())
    }

    async fn discard_staged(&self, source_id: SourceId) -> Result<()> {
        let mut inner = self.write()?;
        for id in inner.chunk_ids_where(source_id, |c| c.staged) {
            inner.remove_chunk(id);
        }
        Ok(())
    }

    async fn scan_page(
        &self,
        filter: &SourceFilter,
        after: Option<ChunkId>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let inner = self.read()?;
        let start = after.map_or(ChunkId::MIN, |a| a.saturating_add(1));
        let page = inner
            .chunks
            .range(start..)
            .filter(|(_, c)| !c.staged)
            .filter_map(|(id, c)| {
                let source = inner.committed(c.chunk.source_id)?;
                if !filter.matches(source) {
                    return None;
                }
                let vector = inner.vectors.get(id)?;
                Some(Candidate {
                    chunk_id: *id,
                    sequence_index: c.chunk.sequence_index,
                    text: c.chunk.text.clone(),
                    source_uri: source.uri.clone(),
                    title: source.title.clone(),
                    source_type: source.source_type.clone(),
                    tags: source.tags.iter().cloned().collect(),
                    updated_at: source.updated_at,
                    vector: vector.clone(),
                })
            })
            .take(limit)
            .collect();
        Ok(page)
    }

    async fn delete_source(&self, uri: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(id) = inner.by_uri.remove(uri) else {
            return Ok(false);
        };
        let was_pending = inner.pending.remove(&id);
        inner.sources.remove(&id);
        for chunk_id in inner.chunk_ids_where(id, |_| true) {
            inner.remove_chunk(chunk_id);
        }
        Ok(!was_pending)
    }

    async fn live_chunks(&self, source_id: SourceId) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.chunk.source_id == source_id && !c.staged)
            .map(|c| c.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);
        Ok(chunks)
    }

    async fn index_dimension(&self) -> Result<Option<usize>> {
        Ok(self.read()?.dimension)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let inner = self.read()?;
        let mut stats = IndexStats {
            dimension: inner.dimension,
            ..Default::default()
        };
        for source in inner
            .sources
            .values()
            .filter(|s| !inner.pending.contains(&s.id))
        {
            stats.sources += 1;
            *stats.by_source_type.entry(source.source_type.clone()).or_default() += 1;
            for tag in &source.tags {
                *stats.by_tag.entry(tag.clone()).or_default() += 1;
            }
        }
        for id in inner.chunks.iter().filter(|(_, c)| !c.staged).map(|(id, _)| id) {
            stats.chunks += 1;
            if inner.vectors.contains_key(id) {
                stats.embedded_chunks += 1;
            }
        }
        stats.tags = stats.by_tag.len() as u64;
        Ok(stats)
    }
}
