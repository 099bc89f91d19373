//! `uridx stats`: index counters.

use anyhow::Result;

use uridx_core::stats::IndexStats;

use crate::index::Index;

pub async fn run_stats(index: &Index, json: bool) -> Result<()> {
    let stats = index.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", format_stats(&stats));
    }
    Ok(())
}

pub fn format_stats(stats: &IndexStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("Sources:         {}\n", stats.sources));
    out.push_str(&format!("Chunks:          {}\n", stats.chunks));
    out.push_str(&format!("Embedded chunks: {}\n", stats.embedded_chunks));
    out.push_str(&format!("Distinct tags:   {}\n", stats.tags));
    out.push_str(&format!(
        "Dimension:       {}\n",
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(not set)".into())
    ));
    out.push_str(&format!(
        "Model:           {}\n",
        stats.model.as_deref().unwrap_or("(not set)")
    ));
    if !stats.by_source_type.is_empty() {
        out.push_str("\nBy type:\n");
        for (ty, n) in &stats.by_source_type {
            out.push_str(&format!("  {ty:<16} {n}\n"));
        }
    }
    if !stats.by_tag.is_empty() {
        out.push_str("\nBy tag:\n");
        for (tag, n) in &stats.by_tag {
            out.push_str(&format!("  {tag:<16} {n}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index() {
        let out = format_stats(&IndexStats::default());
        assert!(out.contains("Sources:         0\n"));
        assert!(out.contains("Dimension:       (not set)\n"));
        assert!(!out.contains("By type"));
    }

    #[test]
    fn breakdowns_are_listed() {
        let mut stats = IndexStats {
            sources: 2,
            dimension: Some(768),
            ..Default::default()
        };
        stats.by_source_type.insert("note".into(), 2);
        stats.by_tag.insert("fruit".into(), 1);
        let out = format_stats(&stats);
        assert!(out.contains("Dimension:       768\n"));
        assert!(out.contains("  note             2\n"));
        assert!(out.contains("  fruit            1\n"));
    }
}
