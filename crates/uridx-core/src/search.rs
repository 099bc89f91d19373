//! Brute-force semantic search over the store.
//!
//! # Algorithm
//!
//! 1. Reject `limit <= 0`; a blank query returns nothing.
//! 2. Embed the query and check it against the index dimension.
//! 3. Page through [`Store::scan_candidates`] with the filter applied.
//! 4. Score each candidate by cosine similarity (clamped to `[-1, 1]`).
//! 5. Keep the best `limit` so far after every page, ordered by score
//!    (desc), source `updated_at` (desc), chunk id (asc).
//!
//! No score cutoff is applied. The ordering is total, so equal inputs
//! always yield the same result list regardless of page size.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::models::{ChunkId, SourceFilter};
use crate::store::{Candidate, Store};

pub const DEFAULT_LIMIT: i64 = 10;
pub const DEFAULT_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub filter: SourceFilter,
    pub limit: i64,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: SourceFilter::default(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.filter.tags.push(tag.into());
        self
    }

    pub fn with_type(mut self, source_type: impl Into<String>) -> Self {
        self.filter.source_type = Some(source_type.into());
        self
    }

    pub fn with_uri_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter.uri_prefix = Some(prefix.into());
        self
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub source_uri: String,
    pub title: Option<String>,
    pub source_type: String,
    pub tags: Vec<String>,
    pub chunk_text: String,
    pub sequence_index: i64,
    pub score: f64,
    pub chunk_id: ChunkId,
    pub updated_at: i64,
}

impl SearchHit {
    fn scored(query_vec: &[f32], c: Candidate) -> Self {
        let score = cosine_similarity(query_vec, &c.vector);
        Self {
            source_uri: c.source_uri,
            title: c.title,
            source_type: c.source_type,
            tags: c.tags,
            chunk_text: c.text,
            sequence_index: c.sequence_index,
            score,
            chunk_id: c.chunk_id,
            updated_at: c.updated_at,
        }
    }
}

/// Score desc, then `updated_at` desc, then `chunk_id` asc.
pub fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Score and rank one batch of candidates, keeping the top `limit`.
pub fn rank(query_vec: &[f32], candidates: Vec<Candidate>, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| SearchHit::scored(query_vec, c))
        .collect();
    hits.sort_by(compare_hits);
    hits.truncate(limit);
    hits
}

pub struct SearchEngine<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    page_size: usize,
}

impl<S: Store> SearchEngine<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.limit <= 0 {
            return Err(Error::InvalidArgument(format!(
                "limit must be positive, got {}",
                request.limit
            )));
        }
        let query = request.query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        // Nothing has been embedded yet, so nothing can match.
        let Some(dimension) = self.store.index_dimension().await? else {
            return Ok(Vec::new());
        };

        let query_vec = self.embedder.embed(query).await?;
        if query_vec.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query_vec.len(),
            });
        }

        let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
        let mut top: Vec<SearchHit> = Vec::new();
        let mut scanned = 0usize;
        let mut scan = self
            .store
            .scan_candidates(request.filter.clone(), self.page_size);
        while let Some(page) = scan.next_page().await? {
            scanned += page.len();
            top.extend(page.into_iter().map(|c| SearchHit::scored(&query_vec, c)));
            top.sort_by(compare_hits);
            top.truncate(limit);
        }
        tracing::debug!(scanned, returned = top.len(), "search complete");
        Ok(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestRequest, Ingestor};
    use crate::store::memory::InMemoryStore;
    use crate::testing::{FixedDimEmbedder, KeywordEmbedder};

    fn candidate(chunk_id: ChunkId, updated_at: i64, vector: Vec<f32>) -> Candidate {
        Candidate {
            chunk_id,
            sequence_index: 0,
            text: format!("chunk {chunk_id}"),
            source_uri: format!("note://{chunk_id}"),
            title: None,
            source_type: "note".into(),
            tags: Vec::new(),
            updated_at,
            vector,
        }
    }

    async fn fixture() -> (Arc<InMemoryStore>, Arc<KeywordEmbedder>) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(KeywordEmbedder::new(&["apples", "oranges", "bananas", "pears"]));
        let ingestor = Ingestor::new(store.clone(), embedder.clone());
        ingestor
            .ingest(&IngestRequest::new("note://a", ["apples and oranges"]).with_tags(["x"]))
            .await
            .unwrap();
        ingestor
            .ingest(&IngestRequest::new("note://b", ["bananas and pears"]).with_tags(["y"]))
            .await
            .unwrap();
        (store, embedder)
    }

    #[test]
    fn ties_break_on_updated_at_then_chunk_id() {
        let v = vec![1.0, 0.0];
        let hits = rank(
            &v,
            vec![
                candidate(3, 10, v.clone()),
                candidate(1, 10, v.clone()),
                candidate(2, 20, v.clone()),
                candidate(4, 99, vec![0.0, 1.0]),
            ],
            10,
        );
        let ids: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);
    }

    #[test]
    fn rank_truncates_to_limit() {
        let v = vec![1.0];
        let hits = rank(&v, (1..=5).map(|i| candidate(i, 0, v.clone())).collect(), 2);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn end_to_end_ranking_and_tag_filter() {
        let (store, embedder) = fixture().await;
        let engine = SearchEngine::new(store, embedder);

        let hits = engine.search(&SearchRequest::new("apples")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_uri, "note://a");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].tags, vec!["x"]);
        assert_eq!(hits[0].chunk_text, "apples and oranges");

        let filtered = engine
            .search(&SearchRequest::new("apples").with_tag("y"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].source_uri, "note://b");
    }

    #[tokio::test]
    async fn type_and_prefix_filters() {
        let (store, embedder) = fixture().await;
        Ingestor::new(store.clone(), embedder.clone())
            .ingest(&IngestRequest::new("chat://1", ["apples"]).with_type("chat"))
            .await
            .unwrap();
        let engine = SearchEngine::new(store, embedder);

        let chats = engine
            .search(&SearchRequest::new("apples").with_type("chat"))
            .await
            .unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].source_uri, "chat://1");

        let notes = engine
            .search(&SearchRequest::new("apples").with_uri_prefix("note://"))
            .await
            .unwrap();
        assert!(notes.iter().all(|h| h.source_uri.starts_with("note://")));
        assert_eq!(notes.len(), 2);

        let none = engine
            .search(&SearchRequest::new("apples").with_tag("x").with_tag("y"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn page_size_does_not_change_results() {
        let (store, embedder) = fixture().await;
        let ingestor = Ingestor::new(store.clone(), embedder.clone());
        for i in 0..7 {
            ingestor
                .ingest(&IngestRequest::new(format!("note://n{i}"), ["pears and apples"]))
                .await
                .unwrap();
        }
        let req = SearchRequest::new("apples pears").with_limit(4);
        let big = SearchEngine::new(store.clone(), embedder.clone())
            .search(&req)
            .await
            .unwrap();
        let small = SearchEngine::new(store, embedder)
            .with_page_size(1)
            .search(&req)
            .await
            .unwrap();
        assert_eq!(big, small);
        assert_eq!(big.len(), 4);
    }

    #[tokio::test]
    async fn invalid_limit_and_blank_query() {
        let (store, embedder) = fixture().await;
        let engine = SearchEngine::new(store, embedder.clone());
        for limit in [0, -3] {
            let err = engine
                .search(&SearchRequest::new("apples").with_limit(limit))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        let calls = embedder.calls();
        assert!(engine.search(&SearchRequest::new("   ")).await.unwrap().is_empty());
        assert_eq!(embedder.calls(), calls);
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let embedder = Arc::new(KeywordEmbedder::new(&["x"]));
        let engine = SearchEngine::new(Arc::new(InMemoryStore::new()), embedder.clone());
        assert!(engine.search(&SearchRequest::new("x")).await.unwrap().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn query_dimension_mismatch_is_fatal() {
        let (store, _) = fixture().await;
        let engine = SearchEngine::new(store, Arc::new(FixedDimEmbedder(6)));
        let err = engine.search(&SearchRequest::new("apples")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 5,
                actual: 6
            }
        ));
    }
}
