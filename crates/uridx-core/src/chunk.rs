//! Chunk drafting: fingerprints and paragraph splitting for raw text.
//!
//! Ingestion records usually arrive pre-chunked. Raw text bodies (the
//! `ingest --text` path and the `ingest` tool) are split here on blank-line
//! paragraph boundaries, packing paragraphs greedily up to `max_tokens`
//! (estimated at four characters per token). A paragraph that is longer
//! than the budget on its own is cut at the last whitespace before the
//! limit, or at the limit itself when there is none.
//!
//! ```rust
//! use uridx_core::chunk::split_paragraphs;
//!
//! let drafts = split_paragraphs("First paragraph.\n\nSecond one.", 700);
//! assert_eq!(drafts.len(), 1);
//! assert_eq!(drafts[0].sequence_index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::ChunkDraft;

const CHARS_PER_TOKEN: usize = 4;

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl ChunkDraft {
    pub fn new(sequence_index: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            sequence_index,
            text,
            content_hash,
        }
    }
}

/// Build drafts from already-chunked texts, numbering them from 0.
pub fn drafts_from_texts<I, T>(texts: I) -> Vec<ChunkDraft>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(i, t)| ChunkDraft::new(i as i64, t))
        .collect()
}

/// Split a raw text body into drafts. Blank input yields no drafts.
pub fn split_paragraphs(text: &str, max_tokens: usize) -> Vec<ChunkDraft> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !buf.is_empty() && buf.len() + 2 + para.len() > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }
        if para.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            hard_split(para, max_chars, &mut pieces);
            continue;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    drafts_from_texts(pieces)
}

fn hard_split(mut rest: &str, max_chars: usize, out: &mut Vec<String>) {
    while rest.len() > max_chars {
        let limit = floor_char_boundary(rest, max_chars);
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        // A budget smaller than the first character still has to make progress.
        let cut = if cut == 0 {
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            cut
        };
        let (head, tail) = rest.split_at(cut);
        let head = head.trim();
        if !head.is_empty() {
            out.push(head.to_string());
        }
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
