//! # uridx core
//!
//! Indexing and retrieval engine for uridx: the source/chunk data model,
//! the [`store::Store`] abstraction with an in-memory backend, the
//! [`ingest::Ingestor`] that diffs re-ingested sources so unchanged chunks
//! are never re-embedded, and the brute-force cosine
//! [`search::SearchEngine`].
//!
//! This crate performs no network or filesystem I/O. Embedding backends
//! and the SQLite store live in the `uridx` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
