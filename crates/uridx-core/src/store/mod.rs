//! Storage abstraction for the index.
//!
//! The [`Store`] trait covers every persistence operation the ingestor,
//! search engine and adapters need. Two backends implement it:
//! [`memory::InMemoryStore`] here, and `SqliteStore` in the app crate.
//!
//! # Write protocol
//!
//! Chunk replacement is two-phase so readers never see a half-ingested
//! source:
//!
//! 1. [`replace_chunks`](Store::replace_chunks) diffs the new drafts
//!    against the live chunks and writes *staged* rows for every changed
//!    or new position. Staged rows are invisible to scans and lookups.
//! 2. The caller embeds each staged row and stores the vector with
//!    [`write_embedding`](Store::write_embedding).
//! 3. [`commit_chunks`](Store::commit_chunks) atomically promotes the
//!    staged rows, deleting the live rows they supersede and any trailing
//!    rows past the new length. The new source metadata and, on the first
//!    commit, the index dimension are applied in the same step.
//!    [`discard_staged`](Store::discard_staged) drops the staged rows
//!    instead.
//!
//! A source created by [`upsert_source`](Store::upsert_source) stays
//! *pending* until its first commit. Pending sources are hidden from
//! lookups, scans and stats.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_source`](Store::upsert_source) | Resolve a uri to a source id, creating a pending row |
//! | [`replace_chunks`](Store::replace_chunks) | Stage changed chunks, report the diff |
//! | [`write_embedding`](Store::write_embedding) | Attach a vector to a chunk |
//! | [`commit_chunks`](Store::commit_chunks) | Publish staged chunks |
//! | [`scan_page`](Store::scan_page) | One keyset page of search candidates |
//! | [`delete_source`](Store::delete_source) | Cascade-delete a source |

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkDraft, ChunkId, Source, SourceFilter, SourceId, SourceMetadata, SourceWithChunks};
use crate::stats::IndexStats;

/// How [`Store::replace_chunks`] decides which positions need new rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffPolicy {
    /// Keep a live chunk when its content hash matches the draft.
    #[default]
    ByContentHash,
    /// Stage every draft, forcing a full re-embed.
    RestageAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkChange {
    /// No live chunk existed at this position.
    Created,
    /// A live chunk with different text existed at this position.
    Updated,
}

/// A staged chunk that still needs an embedding vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSlot {
    pub chunk_id: ChunkId,
    pub sequence_index: i64,
    pub text: String,
    pub change: ChunkChange,
}

/// Result of [`Store::replace_chunks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDiff {
    pub source_id: SourceId,
    /// Length of the new chunk list. Live rows at or past this index are
    /// removed on commit.
    pub chunk_count: usize,
    pub to_embed: Vec<EmbeddingSlot>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ChunkDiff {
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// A live, embedded chunk joined with its source, as seen by search.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    pub sequence_index: i64,
    pub text: String,
    pub source_uri: String,
    pub title: Option<String>,
    pub source_type: String,
    pub tags: Vec<String>,
    pub updated_at: i64,
    pub vector: Vec<f32>,
}

/// Positional diff shared by the store backends.
#[derive(Debug)]
pub struct DiffPlan<'d> {
    pub stage: Vec<(&'d ChunkDraft, ChunkChange)>,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Compare drafts against the live `(sequence_index, content_hash)` pairs
/// of a source.
///
/// Drafts must be numbered `0..n` in order. Equal text at different
/// positions is never matched across positions.
pub fn plan_diff<'d>(
    live: &[(i64, String)],
    drafts: &'d [ChunkDraft],
    policy: DiffPolicy,
) -> Result<DiffPlan<'d>> {
    for (i, d) in drafts.iter().enumerate() {
        if d.sequence_index != i as i64 {
            return Err(Error::InvalidArgument(format!(
                "chunk drafts must be numbered 0..{}, found {} at position {i}",
                drafts.len(),
                d.sequence_index
            )));
        }
    }

    let by_index: HashMap<i64, &str> = live.iter().map(|(i, h)| (*i, h.as_str())).collect();
    let mut plan = DiffPlan {
        stage: Vec::new(),
        unchanged: 0,
        deleted: 0,
    };
    for d in drafts {
        match by_index.get(&d.sequence_index) {
            Some(hash) if *hash == d.content_hash && policy == DiffPolicy::ByContentHash => {
                plan.unchanged += 1;
            }
            Some(_) => plan.stage.push((d, ChunkChange::Updated)),
            None => plan.stage.push((d, ChunkChange::Created)),
        }
    }
    plan.deleted = live
        .iter()
        .filter(|(i, _)| *i >= drafts.len() as i64)
        .count();
    Ok(plan)
}

/// Abstract storage backend.
///
/// All failures from the underlying medium surface as
/// [`Error::StorageIo`]; implementations never retry internally.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the id of the source at `uri`. An unseen uri gets a new
    /// pending row carrying `metadata`; a pending row left behind by an
    /// interrupted ingestion takes the new metadata. A committed source is
    /// returned untouched: its metadata only changes in
    /// [`commit_chunks`](Store::commit_chunks).
    async fn upsert_source(&self, uri: &str, metadata: &SourceMetadata) -> Result<SourceId>;

    /// The committed source at `uri`. Pending sources are not returned.
    async fn get_source(&self, uri: &str) -> Result<Option<Source>>;

    /// Stage new rows for every changed position and report the diff.
    /// Any rows left staged by an earlier, interrupted call are dropped
    /// first.
    async fn replace_chunks(
        &self,
        source_id: SourceId,
        drafts: &[ChunkDraft],
        policy: DiffPolicy,
    ) -> Result<ChunkDiff>;

    /// Store the vector for a staged chunk. A length that disagrees with
    /// the index dimension, or with vectors already staged for the same
    /// source, fails with [`Error::DimensionMismatch`] and changes nothing.
    async fn write_embedding(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()>;

    /// Atomically publish the staged rows described by `diff` together with
    /// `metadata`.
    ///
    /// The first commit that carries vectors fixes the index dimension. If
    /// another commit fixed it first with a different length, this fails
    /// with [`Error::DimensionMismatch`] and changes nothing. `updated_at`
    /// moves only when the chunks or the metadata actually change.
    async fn commit_chunks(
        &self,
        source_id: SourceId,
        metadata: &SourceMetadata,
        diff: &ChunkDiff,
    ) -> Result<()>;

    async fn discard_staged(&self, source_id: SourceId) -> Result<()>;

    /// Up to `limit` live, embedded chunks with `chunk_id > after` whose
    /// source matches `filter`, ordered by `chunk_id` ascending.
    async fn scan_page(
        &self,
        filter: &SourceFilter,
        after: Option<ChunkId>,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// Delete a source with its chunks and vectors. Returns whether a
    /// committed source existed.
    async fn delete_source(&self, uri: &str) -> Result<bool>;

    /// Live chunks of a source, ordered by `sequence_index`.
    async fn live_chunks(&self, source_id: SourceId) -> Result<Vec<Chunk>>;

    /// The embedding dimension, once the first vector has been committed.
    async fn index_dimension(&self) -> Result<Option<usize>>;

    async fn stats(&self) -> Result<IndexStats>;

    async fn get_source_with_chunks(&self, uri: &str) -> Result<Option<SourceWithChunks>> {
        let Some(source) = self.get_source(uri).await? else {
            return Ok(None);
        };
        let chunks = self.live_chunks(source.id).await?;
        Ok(Some(SourceWithChunks { source, chunks }))
    }

    /// Lazy, restartable scan over search candidates, fetched in pages of
    /// `page_size`.
    fn scan_candidates(&self, filter: SourceFilter, page_size: usize) -> CandidateScan<'_, Self>
    where
        Self: Sized,
    {
        CandidateScan::new(self, filter, page_size)
    }
}

/// Keyset-paged cursor over [`Store::scan_page`].
///
/// Each call to [`next_page`](CandidateScan::next_page) issues one bounded
/// query, so memory use is proportional to the page size rather than the
/// index size.
pub struct CandidateScan<'a, S: ?Sized> {
    store: &'a S,
    filter: SourceFilter,
    page_size: usize,
    cursor: Option<ChunkId>,
    exhausted: bool,
}

impl<'a, S: Store + ?Sized> CandidateScan<'a, S> {
    pub fn new(store: &'a S, filter: SourceFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// The next page, or `None` once the scan is finished.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Candidate>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .store
            .scan_page(&self.filter, self.cursor, self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => self.cursor = Some(last.chunk_id),
            None => return Ok(None),
        }
        Ok(Some(page))
    }

    /// Rewind to the first page.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::drafts_from_texts;

    fn live(drafts: &[ChunkDraft]) -> Vec<(i64, String)> {
        drafts
            .iter()
            .map(|d| (d.sequence_index, d.content_hash.clone()))
            .collect()
    }

    #[test]
    fn identical_drafts_are_unchanged() {
        let drafts = drafts_from_texts(["a", "b"]);
        let plan = plan_diff(&live(&drafts), &drafts, DiffPolicy::ByContentHash).unwrap();
        assert!(plan.stage.is_empty());
        assert_eq!(plan.unchanged, 2);
        assert_eq!(plan.deleted, 0);
    }

    #[test]
    fn positional_changes_and_trailing_deletes() {
        let old = drafts_from_texts(["a", "b", "c"]);
        let new = drafts_from_texts(["a", "B"]);
        let plan = plan_diff(&live(&old), &new, DiffPolicy::ByContentHash).unwrap();
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.deleted, 1);
        assert_eq!(plan.stage.len(), 1);
        assert_eq!(plan.stage[0].0.text, "B");
        assert_eq!(plan.stage[0].1, ChunkChange::Updated);
    }

    #[test]
    fn swapped_texts_are_both_updates() {
        let old = drafts_from_texts(["a", "b"]);
        let new = drafts_from_texts(["b", "a"]);
        let plan = plan_diff(&live(&old), &new, DiffPolicy::ByContentHash).unwrap();
        assert_eq!(plan.stage.len(), 2);
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn restage_all_ignores_hashes() {
        let drafts = drafts_from_texts(["a", "b"]);
        let plan = plan_diff(&live(&drafts), &drafts, DiffPolicy::RestageAll).unwrap();
        assert_eq!(plan.stage.len(), 2);
        assert!(plan.stage.iter().all(|(_, c)| *c == ChunkChange::Updated));
    }

    #[test]
    fn gaps_in_numbering_are_rejected() {
        let drafts = vec![ChunkDraft::new(0, "a"), ChunkDraft::new(2, "b")];
        let err = plan_diff(&[], &drafts, DiffPolicy::ByContentHash).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
