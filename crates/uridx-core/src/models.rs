//! Data model for indexed sources and their chunks.
//!
//! A [`Source`] is a logical content origin keyed by `uri`. It owns an
//! ordered list of [`Chunk`]s, and each chunk owns exactly one embedding
//! vector. Tags are kept in a [`BTreeSet`] so they are always sorted and
//! deduplicated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Row id of a source.
pub type SourceId = i64;

/// Row id of a chunk. Assigned monotonically; a chunk whose text changes
/// is superseded by a row with a new id.
pub type ChunkId = i64;

/// Source type used when an ingestion request does not name one.
pub const DEFAULT_SOURCE_TYPE: &str = "note";

/// Mutable metadata of a source, as supplied by an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub source_type: String,
    pub tags: BTreeSet<String>,
    /// Free-form provenance supplied by the producer (often a JSON string).
    /// Stored and returned as is, never embedded.
    #[serde(default)]
    pub context: Option<String>,
}

impl Default for SourceMetadata {
    fn default() -> Self {
        Self {
            title: None,
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
            tags: BTreeSet::new(),
            context: None,
        }
    }
}

/// A stored source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub uri: String,
    pub title: Option<String>,
    pub source_type: String,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Unix seconds, UTC.
    pub created_at: i64,
    /// Unix seconds, UTC. Bumped only when metadata or chunk content changes.
    pub updated_at: i64,
}

impl Source {
    pub fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            title: self.title.clone(),
            source_type: self.source_type.clone(),
            tags: self.tags.clone(),
            context: self.context.clone(),
        }
    }
}

/// A live chunk row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_id: SourceId,
    pub sequence_index: i64,
    pub text: String,
    /// Lowercase hex SHA-256 of `text`.
    pub content_hash: String,
}

/// A chunk that has not been stored yet: position, text, and fingerprint.
///
/// Build these with [`crate::chunk::ChunkDraft::new`] so the hash always
/// matches the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub sequence_index: i64,
    pub text: String,
    pub content_hash: String,
}

/// A source together with its live chunks, ordered by `sequence_index`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceWithChunks {
    #[serde(flatten)]
    pub source: Source,
    pub chunks: Vec<Chunk>,
}

/// Restricts which sources a candidate scan visits.
///
/// Every populated field must match. `tags` requires all listed tags to be
/// present on the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    pub source_type: Option<String>,
    pub tags: Vec<String>,
    pub uri_prefix: Option<String>,
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        if let Some(t) = &self.source_type {
            if &source.source_type != t {
                return false;
            }
        }
        if let Some(prefix) = &self.uri_prefix {
            if !source.uri.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.tags.iter().all(|t| source.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(uri: &str, source_type: &str, tags: &[&str]) -> Source {
        Source {
            id: 1,
            uri: uri.to_string(),
            title: None,
            source_type: source_type.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            context: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(SourceFilter::default().matches(&source("note://a", "note", &[])));
    }

    #[test]
    fn tag_filter_requires_all_tags() {
        let s = source("note://a", "note", &["x", "y"]);
        let mut f = SourceFilter {
            tags: vec!["x".into()],
            ..Default::default()
        };
        assert!(f.matches(&s));
        f.tags.push("y".into());
        assert!(f.matches(&s));
        f.tags.push("z".into());
        assert!(!f.matches(&s));
    }

    #[test]
    fn type_and_prefix_filters() {
        let s = source("chat://2024/01", "chat", &[]);
        let by_type = SourceFilter {
            source_type: Some("note".into()),
            ..Default::default()
        };
        assert!(!by_type.matches(&s));

        let by_prefix = SourceFilter {
            uri_prefix: Some("chat://2024".into()),
            ..Default::default()
        };
        assert!(by_prefix.matches(&s));

        let other_prefix = SourceFilter {
            uri_prefix: Some("chat://2023".into()),
            ..Default::default()
        };
        assert!(!other_prefix.matches(&s));
    }
}
