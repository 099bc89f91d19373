//! `uridx extract`: turn local files into ingestion records.
//!
//! Every extractor writes one JSON Lines record per source to stdout, ready
//! to pipe into `uridx ingest`:
//!
//! ```bash
//! uridx extract markdown ~/notes | uridx ingest
//! uridx extract claude-code | uridx ingest
//! ```
//!
//! | Extractor | Source | Chunks |
//! |-----------|--------|--------|
//! | `markdown` | one `.md` file | ATX heading sections |
//! | `claude-code` | one session log under `~/.claude/projects` | user/assistant turns |
//!
//! Records never set `replace`, so re-running an extractor over unchanged
//! files embeds nothing and an appended session only embeds its new turns.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::{json, Value};
use tracing::warn;
use walkdir::WalkDir;

use uridx_core::ingest::IngestRequest;

const INCLUDE: &[&str] = &["**/*.md", "**/*.markdown"];
const EXCLUDE: &[&str] = &["**/.git/**", "**/node_modules/**", "**/target/**"];

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

/// Markdown files under `root` (or `root` itself when it is a file),
/// sorted by path.
pub fn find_markdown_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }

    let include = build_globset(INCLUDE)?;
    let exclude = build_globset(EXCLUDE)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) || !include.is_match(relative) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(|c: char| c == ' ' || c == '\t')
}

/// Split a markdown document into heading sections. Blank sections are
/// dropped; a document without headings is one section.
pub fn split_sections(content: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if is_heading(line) && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }
    sections
}

/// Build the ingestion record for one file, or `None` if it has no text.
pub fn markdown_record(path: &Path) -> Result<Option<IngestRequest>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let sections = split_sections(&content);
    if sections.is_empty() {
        return Ok(None);
    }

    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let context = json!({ "path": path.display().to_string() });

    Ok(Some(
        IngestRequest::new(format!("file://{}", absolute.display()), sections)
            .with_title(title)
            .with_type("markdown")
            .with_tags(["markdown", "document"])
            .with_context(context.to_string()),
    ))
}

fn write_record<W: Write>(out: &mut W, record: &IngestRequest) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Write one JSON line per markdown file under `root` to `out`. Unreadable
/// files are logged and skipped. Returns the number of records written.
pub fn extract_markdown<W: Write>(root: &Path, out: &mut W) -> Result<usize> {
    let mut written = 0;
    for path in find_markdown_files(root)? {
        match markdown_record(&path) {
            Ok(Some(record)) => {
                write_record(out, &record)?;
                written += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping file"),
        }
    }
    Ok(written)
}

pub fn run_extract_markdown(path: Option<PathBuf>) -> Result<()> {
    let root = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    extract_markdown(&root, &mut out)?;
    out.flush()?;
    Ok(())
}

// ============ Claude Code conversations ============

/// Session logs laid out as `<root>/<project>/<session>.jsonl`, as
/// `(project, path)` pairs sorted by path. Empty files are skipped.
pub fn find_conversation_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        bail!("Projects directory not found: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension() != Some("jsonl".as_ref()) {
            continue;
        }
        if entry.metadata()?.len() == 0 {
            continue;
        }
        let Some(project) = path.parent().and_then(Path::file_name) else {
            continue;
        };
        files.push((project.to_string_lossy().to_string(), path.to_path_buf()));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Visible text of one message: plain string content, or the text blocks
/// of a block list with tool calls reduced to `[Tool: name]`.
fn message_text(message: &Value) -> String {
    match &message["content"] {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block["type"].as_str() {
                Some("text") => Some(block["text"].as_str().unwrap_or_default().to_string()),
                Some("tool_use") => Some(format!(
                    "[Tool: {}]",
                    block["name"].as_str().unwrap_or("unknown")
                )),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn is_tool_result(entry: &Value) -> bool {
    entry["message"]["content"]
        .as_array()
        .and_then(|blocks| blocks.first())
        .is_some_and(|first| first["type"] == "tool_result")
}

fn push_turn(turns: &mut Vec<String>, user: Option<String>, assistant: &mut Vec<String>) {
    let mut parts = Vec::new();
    if let Some(user) = user {
        parts.push(format!("User: {user}"));
    }
    if !assistant.is_empty() {
        parts.push(format!("Assistant: {}", assistant.join(" ")));
    }
    assistant.clear();
    if !parts.is_empty() {
        turns.push(parts.join("\n\n"));
    }
}

/// Group log entries into turns: a user prompt plus every assistant reply
/// up to the next prompt. Tool results do not start a new turn.
pub fn build_turns(entries: &[Value]) -> Vec<String> {
    let mut turns = Vec::new();
    let mut user = None;
    let mut assistant = Vec::new();

    for entry in entries {
        let kind = entry["type"].as_str();
        if !matches!(kind, Some("user" | "assistant")) {
            continue;
        }
        let text = message_text(&entry["message"]);
        if text.is_empty() {
            continue;
        }
        match kind {
            Some("user") if !is_tool_result(entry) => {
                push_turn(&mut turns, user.take(), &mut assistant);
                user = Some(text);
            }
            Some("assistant") => assistant.push(text),
            _ => {}
        }
    }
    push_turn(&mut turns, user, &mut assistant);
    turns
}

/// Build the record for one session log, or `None` when it has no turns.
/// Lines that are not JSON are skipped.
pub fn conversation_record(project: &str, path: &Path) -> Result<Option<IngestRequest>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut entries = Vec::new();
    let mut session: Option<Value> = None;
    let mut started_at = Value::Null;
    let mut ended_at = Value::Null;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if started_at.is_null() {
            started_at = entry["timestamp"].clone();
        }
        ended_at = entry["timestamp"].clone();
        if session.is_none() && entry["cwd"].as_str().is_some_and(|c| !c.is_empty()) {
            session = Some(json!({
                "project_path": entry["cwd"],
                "agent_id": entry["agentId"],
                "session_id": entry["sessionId"],
                "git_branch": entry["gitBranch"],
                "slug": entry["slug"],
            }));
        }
        entries.push(entry);
    }

    let turns = build_turns(&entries);
    if turns.is_empty() {
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut context = session.unwrap_or_else(|| json!({}));
    let title = context["slug"]
        .as_str()
        .filter(|s| !s.is_empty())
        .unwrap_or(&stem)
        .to_string();
    context["started_at"] = started_at;
    context["ended_at"] = ended_at;

    Ok(Some(
        IngestRequest::new(format!("claude-code://{project}/{stem}"), turns)
            .with_title(title)
            .with_type("claude-code")
            .with_tags(["claude-code", "conversation"])
            .with_context(context.to_string()),
    ))
}

/// Write one JSON line per session log under `root`. Unreadable logs are
/// logged and skipped. Returns the number of records written.
pub fn extract_conversations<W: Write>(root: &Path, out: &mut W) -> Result<usize> {
    let mut written = 0;
    for (project, path) in find_conversation_files(root)? {
        match conversation_record(&project, &path) {
            Ok(Some(record)) => {
                write_record(out, &record)?;
                written += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping session log"),
        }
    }
    Ok(written)
}

/// Entry point for `uridx extract claude-code [path]`. Defaults to
/// `$HOME/.claude/projects`.
pub fn run_extract_claude_code(path: Option<PathBuf>) -> Result<()> {
    let root = match path {
        Some(p) => p,
        None => match std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            Some(home) => PathBuf::from(home).join(".claude").join("projects"),
            None => bail!("HOME is not set; pass the projects directory explicitly"),
        },
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    extract_conversations(&root, &mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_need_a_space() {
        assert!(is_heading("# Title"));
        assert!(is_heading("###### Deep"));
        assert!(!is_heading("####### Too deep"));
        assert!(!is_heading("#hashtag"));
        assert!(!is_heading("plain"));
    }

    #[test]
    fn splits_at_headings() {
        let doc = "intro line\n\n# One\nbody one\n\n## Two\nbody two\n";
        assert_eq!(
            split_sections(doc),
            vec!["intro line", "# One\nbody one", "## Two\nbody two"]
        );
    }

    #[test]
    fn document_without_headings_is_one_section() {
        assert_eq!(split_sections("just text\n\nmore"), vec!["just text\n\nmore"]);
        assert!(split_sections("  \n\n").is_empty());
    }

    #[test]
    fn walks_markdown_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\ntext").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.MD"), "b").unwrap();
        std::fs::write(dir.path().join("c.txt"), "c").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/d.md"), "d").unwrap();

        let files = find_markdown_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.MD"]);
    }

    #[test]
    fn emits_ingestable_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "# Setup\nrun it\n# Usage\nuse it").unwrap();
        std::fs::write(dir.path().join("empty.md"), "\n").unwrap();

        let mut out = Vec::new();
        assert_eq!(extract_markdown(dir.path(), &mut out).unwrap(), 1);
        let line = String::from_utf8(out).unwrap();
        let record = IngestRequest::from_json(line.trim()).unwrap();
        assert!(record.source_uri.starts_with("file://"));
        assert!(record.source_uri.ends_with("guide.md"));
        assert_eq!(record.title.as_deref(), Some("guide"));
        assert_eq!(record.source_type.as_deref(), Some("markdown"));
        assert_eq!(record.tags, vec!["markdown", "document"]);
        assert_eq!(record.chunks.len(), 2);
        assert!(!record.replace);
        let context: Value = serde_json::from_str(record.context.as_deref().unwrap()).unwrap();
        assert!(context["path"].as_str().unwrap().ends_with("guide.md"));
    }

    fn log_line(value: Value) -> String {
        format!("{value}\n")
    }

    fn session_log() -> String {
        [
            json!({"type": "summary", "summary": "ignored"}),
            json!({"type": "user", "cwd": "/work/app", "sessionId": "s-1", "gitBranch": "main",
                   "slug": "fix-login", "timestamp": "2026-10-01T10:00:00Z",
                   "message": {"role": "user", "content": "why does login fail?"}}),
            json!({"type": "assistant", "timestamp": "2026-10-01T10:00:05Z",
                   "message": {"content": [{"type": "text", "text": "Let me look."},
                                           {"type": "tool_use", "name": "Read", "input": {}}]}}),
            json!({"type": "user", "timestamp": "2026-10-01T10:00:06Z",
                   "message": {"content": [{"type": "tool_result", "content": "file body"}]}}),
            json!({"type": "assistant", "timestamp": "2026-10-01T10:00:09Z",
                   "message": {"content": [{"type": "text", "text": "The token expired."}]}}),
            json!({"type": "user", "timestamp": "2026-10-01T10:01:00Z",
                   "message": {"content": [{"type": "text", "text": "thanks"}]}}),
        ]
        .into_iter()
        .map(log_line)
        .collect()
    }

    #[test]
    fn turns_pair_prompts_with_replies() {
        let entries: Vec<Value> = session_log()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            build_turns(&entries),
            vec![
                "User: why does login fail?\n\nAssistant: Let me look.\n[Tool: Read] The token expired.",
                "User: thanks",
            ]
        );
    }

    #[test]
    fn conversation_record_carries_session_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jsonl");
        std::fs::write(&path, format!("{}not json\n", session_log())).unwrap();

        let record = conversation_record("-work-app", &path).unwrap().unwrap();
        assert_eq!(record.source_uri, "claude-code://-work-app/abc");
        assert_eq!(record.title.as_deref(), Some("fix-login"));
        assert_eq!(record.source_type.as_deref(), Some("claude-code"));
        assert_eq!(record.tags, vec!["claude-code", "conversation"]);
        assert_eq!(record.chunks.len(), 2);
        assert!(!record.replace);

        let context: Value = serde_json::from_str(record.context.as_deref().unwrap()).unwrap();
        assert_eq!(context["project_path"], "/work/app");
        assert_eq!(context["session_id"], "s-1");
        assert_eq!(context["git_branch"], "main");
        assert_eq!(context["started_at"], "2026-10-01T10:00:00Z");
        assert_eq!(context["ended_at"], "2026-10-01T10:01:00Z");
    }

    #[test]
    fn session_without_slug_is_titled_by_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jsonl");
        let line = json!({"type": "user", "message": {"content": "hello"}});
        std::fs::write(&path, log_line(line)).unwrap();

        let record = conversation_record("p", &path).unwrap().unwrap();
        assert_eq!(record.title.as_deref(), Some("plain"));
        assert_eq!(record.chunks[0].text, "User: hello");

        std::fs::write(&path, log_line(json!({"type": "summary"}))).unwrap();
        assert!(conversation_record("p", &path).unwrap().is_none());
    }

    #[test]
    fn finds_session_logs_one_level_down() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-work-app");
        std::fs::create_dir_all(project.join("nested")).unwrap();
        std::fs::write(project.join("b.jsonl"), session_log()).unwrap();
        std::fs::write(project.join("a.jsonl"), session_log()).unwrap();
        std::fs::write(project.join("empty.jsonl"), "").unwrap();
        std::fs::write(project.join("notes.txt"), "x").unwrap();
        std::fs::write(project.join("nested").join("c.jsonl"), session_log()).unwrap();
        std::fs::write(dir.path().join("top.jsonl"), session_log()).unwrap();

        let files = find_conversation_files(dir.path()).unwrap();
        let found: Vec<(&str, String)> = files
            .iter()
            .map(|(p, f)| (p.as_str(), f.file_name().unwrap().to_string_lossy().to_string()))
            .collect();
        assert_eq!(
            found,
            vec![("-work-app", "a.jsonl".to_string()), ("-work-app", "b.jsonl".to_string())]
        );

        let mut out = Vec::new();
        assert_eq!(extract_conversations(dir.path(), &mut out).unwrap(), 2);
        assert!(find_conversation_files(&dir.path().join("missing")).is_err());
    }
}
