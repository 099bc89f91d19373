//! # uridx
//!
//! **A personal semantic index for notes, conversations and documents.**
//!
//! uridx stores sources (anything addressable by a uri) as ordered chunks
//! with one embedding vector each, and answers natural-language queries by
//! cosine similarity. Re-ingesting a source only re-embeds the chunks whose
//! text changed.
//!
//! ## Architecture
//!
//! ```text
//!  extract ──JSONL──▶ ingest ──▶ Ingestor ──▶ SqliteStore ◀── SearchEngine ◀── search
//!                                  │                                  ▲
//!                                  └──────▶ Embedder (Ollama/OpenAI) ─┘
//!
//!  CLI (uridx) · MCP over stdio · HTTP tool API
//! ```
//!
//! The engine (data model, store trait, ingestion diff, ranking) lives in
//! `uridx-core`. This crate adds the SQLite backend, HTTP embedders,
//! configuration and the user-facing surfaces.
//!
//! ## Quick Start
//!
//! ```bash
//! uridx init
//! uridx extract markdown ~/notes | uridx ingest
//! echo "remember the milk" | uridx ingest --text note://todo --tag errand
//! uridx search "groceries" -n 5
//! uridx serve                   # MCP over stdio
//! ```

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod index;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod tools;
