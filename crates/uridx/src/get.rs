//! `uridx get` and `uridx delete`: single-source operations.

use anyhow::{bail, Result};

use uridx_core::models::SourceWithChunks;

use crate::index::Index;

/// CLI entry point for `uridx get <uri>`. Fails when the uri is unknown.
pub async fn run_get(index: &Index, uri: &str, json: bool) -> Result<()> {
    let Some(source) = index.get(uri).await? else {
        bail!("source not found: {}", uri);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&source)?);
    } else {
        print!("{}", format_source(&source));
    }
    Ok(())
}

pub fn format_source(s: &SourceWithChunks) -> String {
    let src = &s.source;
    let date = |ts: i64| {
        chrono::DateTime::from_timestamp(ts, 0)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| ts.to_string())
    };

    let mut out = String::new();
    out.push_str("--- Source ---\n");
    out.push_str(&format!("uri:         {}\n", src.uri));
    out.push_str(&format!(
        "title:       {}\n",
        src.title.as_deref().unwrap_or("(untitled)")
    ));
    out.push_str(&format!("type:        {}\n", src.source_type));
    let tags: Vec<&str> = src.tags.iter().map(String::as_str).collect();
    out.push_str(&format!("tags:        {}\n", tags.join(", ")));
    if let Some(context) = &src.context {
        out.push_str(&format!("context:     {}\n", context));
    }
    out.push_str(&format!("created_at:  {}\n", date(src.created_at)));
    out.push_str(&format!("updated_at:  {}\n", date(src.updated_at)));
    out.push('\n');
    out.push_str(&format!("--- Chunks ({}) ---\n", s.chunks.len()));
    for chunk in &s.chunks {
        out.push_str(&format!("[{}] {}\n", chunk.sequence_index, chunk.text));
    }
    out
}

/// CLI entry point for `uridx delete <uri>`.
pub async fn run_delete(index: &Index, uri: &str) -> Result<()> {
    if !index.delete(uri).await? {
        bail!("source not found: {}", uri);
    }
    println!("Deleted {uri}");
    Ok(())
}
