//! `uridx ingest`: feed ingestion records from stdin into the index.
//!
//! Two input modes:
//!
//! - **JSON Lines** (default): one [`IngestRequest`] object per line.
//!   Blank lines are skipped. A malformed, non-UTF-8 or failing record is
//!   logged and counted; the rest of the stream continues.
//! - **Raw text** (`--text <uri>`): the whole of stdin is one body, split
//!   into chunks on paragraph boundaries.
//!
//! A JSON summary is printed to stdout either way.

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{info, warn};

use uridx_core::ingest::{IngestRequest, IngestSummary};
use uridx_core::Error;

use crate::index::Index;

/// Aggregate outcome of a JSON Lines stream.
#[derive(Debug, Default, Serialize)]
pub struct StreamSummary {
    pub records: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks_created: usize,
    pub chunks_updated: usize,
    pub chunks_unchanged: usize,
    pub chunks_deleted: usize,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Serialize)]
pub struct RecordError {
    /// 1-based line number in the input.
    pub line: usize,
    pub error: String,
}

impl StreamSummary {
    fn add(&mut self, summary: &IngestSummary) {
        self.succeeded += 1;
        self.chunks_created += summary.created;
        self.chunks_updated += summary.updated;
        self.chunks_unchanged += summary.unchanged;
        self.chunks_deleted += summary.deleted;
    }
}

/// Ingest every record in `reader`. With `force_replace`, every record is
/// treated as if it carried `"replace": true`.
pub async fn ingest_jsonl<R>(index: &Index, mut reader: R, force_replace: bool) -> Result<StreamSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = StreamSummary::default();
    let mut line_no = 0;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        line_no += 1;
        let line = std::str::from_utf8(&buf)
            .map_err(|e| Error::InvalidIngestRequest(format!("record is not valid UTF-8: {e}")));
        if matches!(&line, Ok(l) if l.trim().is_empty()) {
            continue;
        }
        summary.records += 1;

        let result = match line.and_then(IngestRequest::from_json) {
            Ok(mut request) => {
                request.replace |= force_replace;
                index.ingest(&request).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(s) => summary.add(&s),
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping record");
                summary.failed += 1;
                summary.errors.push(RecordError {
                    line: line_no,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        records = summary.records,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "ingestion stream finished"
    );
    Ok(summary)
}

/// Options for the raw-text mode.
#[derive(Debug, Default)]
pub struct TextOptions {
    pub uri: String,
    pub title: Option<String>,
    pub source_type: Option<String>,
    pub tags: Vec<String>,
    pub replace: bool,
}

/// Ingest a single raw text body as one source.
pub async fn ingest_text(index: &Index, body: &str, options: TextOptions) -> Result<IngestSummary> {
    let mut request = IngestRequest::from_text(&options.uri, body, index.max_tokens())
        .with_tags(options.tags);
    if let Some(title) = options.title {
        request = request.with_title(title);
    }
    if let Some(source_type) = options.source_type {
        request = request.with_type(source_type);
    }
    if options.replace {
        request = request.replacing();
    }
    Ok(index.ingest(&request).await?)
}

/// Entry point for `uridx ingest`. `replace` forces a full re-embed of
/// every JSON Lines record; text mode carries its own flag.
pub async fn run_ingest(index: &Index, text: Option<TextOptions>, replace: bool) -> Result<()> {
    if atty::is(atty::Stream::Stdin) {
        bail!("uridx ingest reads from stdin; pipe JSON Lines or a text body into it");
    }

    match text {
        Some(options) => {
            let mut body = String::new();
            tokio::io::stdin().read_to_string(&mut body).await?;
            let summary = ingest_text(index, &body, options).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = ingest_jsonl(index, stdin, replace).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed > 0 {
                bail!(
                    "{} of {} records failed to ingest",
                    summary.failed,
                    summary.records
                );
            }
        }
    }
    Ok(())
}
