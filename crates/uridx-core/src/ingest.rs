//! Ingestion pipeline: request validation, chunk diffing and embedding.
//!
//! [`Ingestor::ingest`] turns one [`IngestRequest`] into store mutations
//! with at most one embedding call per changed chunk:
//!
//! 1. Validate the request and fingerprint every chunk.
//! 2. Take the per-uri lock and resolve the source id.
//! 3. Stage changed chunks via [`Store::replace_chunks`].
//! 4. Embed each staged chunk and store its vector.
//! 5. Commit chunks and metadata together.
//!
//! New metadata only lands at commit, so readers never see it paired with
//! the old chunks. Any failure discards the staged rows and removes a
//! source that did not exist before.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::{drafts_from_texts, split_paragraphs};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::lock::KeyedLock;
use crate::models::{ChunkDraft, SourceId, SourceMetadata, DEFAULT_SOURCE_TYPE};
use crate::store::{ChunkDiff, DiffPolicy, Store};

/// One chunk of an ingestion record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub text: String,
}

/// An ingestion record, as read from JSON Lines or built by an adapter.
///
/// ```json
/// {"source_uri": "note://idea/1", "title": "Idea", "tags": ["x"],
///  "chunks": [{"text": "first"}, {"text": "second"}]}
/// ```
///
/// `source_type` defaults to `"note"`, `tags` and `replace` to empty/false.
/// Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chunks: Vec<ChunkInput>,
    /// Free-form provenance such as a file path or session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Re-embed every chunk and overwrite metadata wholesale.
    #[serde(default)]
    pub replace: bool,
}

fn null_as_empty<'de, D, T>(d: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

/// A validated request, ready for the store.
#[derive(Debug, Clone)]
pub struct PreparedIngest {
    pub uri: String,
    pub metadata: SourceMetadata,
    pub drafts: Vec<ChunkDraft>,
    pub policy: DiffPolicy,
}

impl IngestRequest {
    pub fn new<I, T>(source_uri: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            source_uri: source_uri.into(),
            title: None,
            source_type: None,
            tags: Vec::new(),
            chunks: chunks
                .into_iter()
                .map(|t| ChunkInput { text: t.into() })
                .collect(),
            context: None,
            replace: false,
        }
    }

    /// Build a request from a raw text body, splitting it on paragraphs.
    pub fn from_text(source_uri: impl Into<String>, body: &str, max_tokens: usize) -> Self {
        let drafts = split_paragraphs(body, max_tokens);
        Self::new(source_uri, drafts.into_iter().map(|d| d.text))
    }

    /// Parse one JSON Lines record.
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::InvalidIngestRequest(format!("malformed record: {e}")))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Validate and normalize: trimmed uri, default type, sorted tag set,
    /// fingerprinted drafts.
    pub fn prepare(&self) -> Result<PreparedIngest> {
        let uri = self.source_uri.trim();
        if uri.is_empty() {
            return Err(Error::InvalidIngestRequest("source_uri is empty".into()));
        }
        if self.chunks.is_empty() {
            return Err(Error::InvalidIngestRequest(format!("{uri}: no chunks")));
        }
        if let Some(i) = self.chunks.iter().position(|c| c.text.trim().is_empty()) {
            return Err(Error::InvalidIngestRequest(format!(
                "{uri}: chunk {i} has no text"
            )));
        }

        let source_type = self
            .source_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_SOURCE_TYPE);
        let tags: BTreeSet<String> = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let context = self
            .context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(PreparedIngest {
            uri: uri.to_string(),
            metadata: SourceMetadata {
                title,
                source_type: source_type.to_string(),
                tags,
                context,
            },
            drafts: drafts_from_texts(self.chunks.iter().map(|c| c.text.clone())),
            policy: if self.replace {
                DiffPolicy::RestageAll
            } else {
                DiffPolicy::ByContentHash
            },
        })
    }
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub source_uri: String,
    pub source_id: SourceId,
    /// True when the uri had not been indexed before.
    pub source_created: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

pub struct Ingestor<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    locks: KeyedLock,
}

impl<S: Store> Ingestor<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            locks: KeyedLock::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestSummary> {
        let prepared = request.prepare()?;
        let uri = prepared.uri.as_str();
        let _guard = self.locks.lock(uri).await;

        let existed = self
            .store
            .get_source(uri)
            .await
            .map_err(|e| Error::ingest(uri, "lookup", e))?
            .is_some();
        let source_id = self
            .store
            .upsert_source(uri, &prepared.metadata)
            .await
            .map_err(|e| Error::ingest(uri, "upsert", e))?;

        match self.write_chunks(source_id, &prepared).await {
            Ok(diff) => {
                info!(
                    uri,
                    created = diff.created,
                    updated = diff.updated,
                    unchanged = diff.unchanged,
                    deleted = diff.deleted,
                    "ingested source"
                );
                Ok(IngestSummary {
                    source_uri: prepared.uri.clone(),
                    source_id,
                    source_created: !existed,
                    created: diff.created,
                    updated: diff.updated,
                    unchanged: diff.unchanged,
                    deleted: diff.deleted,
                })
            }
            Err((stage, err)) => {
                self.roll_back(uri, source_id, existed).await;
                Err(Error::ingest(uri, stage, err))
            }
        }
    }

    async fn write_chunks(
        &self,
        source_id: SourceId,
        prepared: &PreparedIngest,
    ) -> std::result::Result<ChunkDiff, (String, Error)> {
        let diff = self
            .store
            .replace_chunks(source_id, &prepared.drafts, prepared.policy)
            .await
            .map_err(|e| ("stage".to_string(), e))?;

        for slot in &diff.to_embed {
            let stage = || format!("chunk {}", slot.sequence_index);
            debug!(
                uri = %prepared.uri,
                sequence_index = slot.sequence_index,
                change = ?slot.change,
                "embedding chunk"
            );
            let vector = self
                .embedder
                .embed(&slot.text)
                .await
                .map_err(|e| (stage(), e))?;
            self.store
                .write_embedding(slot.chunk_id, &vector)
                .await
                .map_err(|e| (stage(), e))?;
        }

        self.store
            .commit_chunks(source_id, &prepared.metadata, &diff)
            .await
            .map_err(|e| ("commit".to_string(), e))?;
        Ok(diff)
    }

    /// Delete a source and its chunks. Waits for any ingestion of the same
    /// uri to finish first.
    pub async fn delete(&self, uri: &str) -> Result<bool> {
        let _guard = self.locks.lock(uri).await;
        let deleted = self.store.delete_source(uri).await?;
        if deleted {
            info!(uri, "deleted source");
        }
        Ok(deleted)
    }

    async fn roll_back(&self, uri: &str, source_id: SourceId, existed: bool) {
        warn!(uri, "ingestion failed, rolling back");
        if let Err(e) = self.store.discard_staged(source_id).await {
            warn!(uri, error = %e, "failed to discard staged chunks");
        }
        if !existed {
            // A pending row is invisible, but leave nothing behind.
            if let Err(e) = self.store.delete_source(uri).await {
                warn!(uri, error = %e, "failed to remove pending source");
            }
        }
    }
}
