//! `uridx search`: semantic search from the command line.
//!
//! ```bash
//! uridx search "kubernetes networking" --tag infra -n 5
//! uridx search "meeting notes" --type chat --json
//! ```

use anyhow::Result;

use uridx_core::search::{SearchHit, SearchRequest};

use crate::index::Index;

const PREVIEW_CHARS: usize = 200;

pub async fn run_search(index: &Index, request: &SearchRequest, json: bool) -> Result<()> {
    let hits = index.search(request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print!("{}", format_hits(&hits));
    }
    Ok(())
}

/// Human-readable rendering of a result list.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!("[{:.3}] {}\n", hit.score, hit.source_uri));
        if let Some(title) = &hit.title {
            out.push_str(&format!("    Title: {title}\n"));
        }
        out.push_str(&format!("    Type: {}\n", hit.source_type));
        if !hit.tags.is_empty() {
            out.push_str(&format!("    Tags: {}\n", hit.tags.join(", ")));
        }
        if let Some(date) = chrono::DateTime::from_timestamp(hit.updated_at, 0) {
            out.push_str(&format!("    Updated: {}\n", date.format("%Y-%m-%d")));
        }
        out.push_str(&format!("    {}\n\n", preview(&hit.chunk_text)));
    }
    out
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
