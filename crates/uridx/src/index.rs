//! The assembled index: SQLite store plus ingestor, search engine and
//! stats reporter sharing one embedder.
//!
//! Every surface (CLI, HTTP server, MCP bridge) goes through [`Index`].

use std::sync::Arc;

use tracing::warn;

use uridx_core::embedding::Embedder;
use uridx_core::ingest::{IngestRequest, IngestSummary, Ingestor};
use uridx_core::models::SourceWithChunks;
use uridx_core::search::{SearchEngine, SearchHit, SearchRequest};
use uridx_core::stats::{IndexStats, StatsReporter};
use uridx_core::store::Store;
use uridx_core::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

pub struct Index {
    config: Config,
    store: Arc<SqliteStore>,
    ingestor: Ingestor<SqliteStore>,
    engine: SearchEngine<SqliteStore>,
    reporter: StatsReporter<SqliteStore>,
    model: String,
}

impl Index {
    /// Open the database named by `config` with the configured embedder.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::open_with_embedder(config, embedder).await
    }

    pub async fn open_with_embedder(
        config: Config,
        embedder: Arc<dyn Embedder>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db.path).await?);
        let model = embedder.model_name().to_string();
        if let Some(recorded) = store.model().await? {
            if recorded != model {
                warn!(
                    recorded = %recorded,
                    configured = %model,
                    "index was built with a different embedding model; scores may be meaningless"
                );
            }
        }

        Ok(Self {
            ingestor: Ingestor::new(store.clone(), embedder.clone()),
            engine: SearchEngine::new(store.clone(), embedder)
                .with_page_size(config.retrieval.page_size),
            reporter: StatsReporter::new(store.clone()),
            store,
            config,
            model,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestSummary> {
        let summary = self.ingestor.ingest(request).await?;
        if summary.created + summary.updated > 0 {
            if let Some(recorded) = self.store.record_model(&self.model).await? {
                warn!(recorded = %recorded, configured = %self.model, "embedding model differs from index");
            }
        }
        Ok(summary)
    }

    /// A search request carrying the configured default limit.
    pub fn search_request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest::new(query).with_limit(self.config.retrieval.default_limit)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.engine.search(request).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.reporter.report().await
    }

    pub async fn get(&self, uri: &str) -> Result<Option<SourceWithChunks>> {
        self.store.get_source_with_chunks(uri).await
    }

    /// Serialized with ingestion of the same uri.
    pub async fn delete(&self, uri: &str) -> Result<bool> {
        self.ingestor.delete(uri).await
    }

    pub fn max_tokens(&self) -> usize {
        self.config.chunking.max_tokens
    }
}
