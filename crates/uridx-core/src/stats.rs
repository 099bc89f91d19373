//! Read-only aggregate counts over the index.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

/// Snapshot of index-wide counts. Only live chunks are counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub sources: u64,
    pub chunks: u64,
    pub embedded_chunks: u64,
    /// Number of distinct tags across all sources.
    pub tags: u64,
    pub by_source_type: BTreeMap<String, u64>,
    /// Sources carrying each tag.
    pub by_tag: BTreeMap<String, u64>,
    pub dimension: Option<usize>,
    pub model: Option<String>,
}

pub struct StatsReporter<S> {
    store: Arc<S>,
}

impl<S: Store> StatsReporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn report(&self) -> Result<IndexStats> {
        let stats = self.store.stats().await?;
        tracing::debug!(
            sources = stats.sources,
            chunks = stats.chunks,
            "collected index stats"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestRequest, Ingestor};
    use crate::store::memory::InMemoryStore;
    use crate::testing::KeywordEmbedder;

    #[tokio::test]
    async fn counts_sources_chunks_and_tags() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), Arc::new(KeywordEmbedder::new(&["a"])));
        ingestor
            .ingest(&IngestRequest::new("note://1", ["a", "b"]).with_tags(["x", "y"]))
            .await
            .unwrap();
        ingestor
            .ingest(
                &IngestRequest::new("chat://1", ["c"])
                    .with_type("chat")
                    .with_tags(["x"]),
            )
            .await
            .unwrap();

        let stats = StatsReporter::new(store).report().await.unwrap();
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.embedded_chunks, 3);
        assert_eq!(stats.tags, 2);
        assert_eq!(stats.by_tag["x"], 2);
        assert_eq!(stats.by_tag["y"], 1);
        assert_eq!(stats.by_source_type["note"], 1);
        assert_eq!(stats.by_source_type["chat"], 1);
        assert_eq!(stats.dimension, Some(2));
    }

    #[tokio::test]
    async fn empty_index() {
        let stats = StatsReporter::new(Arc::new(InMemoryStore::new()))
            .report()
            .await
            .unwrap();
        assert_eq!(stats, IndexStats::default());
    }
}
