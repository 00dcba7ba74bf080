//! Language-aware code chunking with structural boundary preservation.
//!
//! Text is split along an ordered ladder of separators, most structurally
//! significant first: class boundaries, then function definitions, then
//! blank-line groups, lines, and words. Structural separators are honored
//! wherever they occur; the textural levels (single newlines, spaces) only
//! engage when a piece exceeds the size limit, and carry `overlap` characters
//! of shared context between consecutive windows.

use std::fs;
use std::path::Path;
use tracing::warn;

use crate::types::{Chunk, ChunkKind};

/// Separator ladder for Python sources.
const PYTHON_SEPARATORS: &[&str] = &[
    "\nclass ",
    "\n    class ",
    "\ndef ",
    "\n    def ",
    "\n        def ",
    "\n\n",
    "\n",
    " ",
];

/// Separator ladder for Rust sources: module-level items, then functions.
const RUST_SEPARATORS: &[&str] = &[
    "\npub struct ",
    "\nstruct ",
    "\npub enum ",
    "\nenum ",
    "\npub trait ",
    "\ntrait ",
    "\nimpl ",
    "\npub fn ",
    "\nfn ",
    "\n    pub fn ",
    "\n    fn ",
    "\n\n",
    "\n",
    " ",
];

const GENERIC_SEPARATORS: &[&str] = &["\n\n", "\n", " "];

#[derive(Debug, Clone)]
pub struct CodeChunker {
    separators: Vec<String>,
    language: String,
    chunk_size: usize,
    overlap: usize,
}

impl CodeChunker {
    pub fn new(language: &str, chunk_size: usize, overlap: usize) -> Self {
        let language = language.to_lowercase();
        let separators: Vec<String> = match language.as_str() {
            "python" | "py" => PYTHON_SEPARATORS,
            "rust" | "rs" => RUST_SEPARATORS,
            _ => GENERIC_SEPARATORS,
        }
        .iter()
        .map(|s| (*s).to_string())
        .collect();
        Self { separators, language, chunk_size, overlap }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Split `text` into ordered chunks. `path` is carried as metadata only.
    /// Well-formed input never fails; empty input yields an empty list.
    pub fn chunk_code(&self, text: &str, path: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces: Vec<(usize, String)> = Vec::new();
        split_recursive(text, 0, &self.separators, 0, self.chunk_size, self.overlap, &mut pieces);

        let mut chunks = Vec::new();
        let mut prev_end = 0u32;
        for (offset, piece) in pieces {
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lead = piece.len() - piece.trim_start().len();
            let content_offset = (offset + lead).min(text.len());
            // Exact attribution for structural pieces; windows carried into an
            // oversized piece re-claim overlapped lines, so the running bound
            // keeps start_line strictly increasing.
            let exact_start = 1 + count_newlines(&text[..content_offset]);
            let start_line = exact_start.max(prev_end + 1);
            let end_line = start_line + count_newlines(trimmed);
            prev_end = end_line;

            chunks.push(Chunk {
                content: trimmed.to_string(),
                source_path: path.to_string(),
                start_line,
                end_line,
                kind: classify(trimmed, &self.language),
                content_hash: Chunk::hash_content(trimmed),
            });
        }
        chunks
    }

    /// Chunk a file from disk. Unreadable or undecodable files are skipped
    /// with a logged warning; the indexing pipeline keeps going.
    pub fn chunk_file(&self, path: &Path) -> Vec<Chunk> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        self.chunk_code(&text, &path.to_string_lossy())
    }
}

/// Recursively split `text` (located at byte `base` of the original input)
/// using `seps[from..]`. Structural separators split at every occurrence;
/// pieces still over `size` descend to the next separator. `"\n"` and `" "`
/// are size-gated and pack their units into overlapping windows.
fn split_recursive(
    text: &str,
    base: usize,
    seps: &[String],
    from: usize,
    size: usize,
    overlap: usize,
    out: &mut Vec<(usize, String)>,
) {
    let mut i = from;
    loop {
        if i >= seps.len() {
            // Ladder exhausted. A lone token longer than the limit is kept
            // whole rather than corrupted; anything else falls back to
            // character slicing.
            if text.len() <= size || text.split_whitespace().nth(1).is_none() {
                out.push((base, text.to_string()));
            } else {
                split_chars(text, base, size, overlap, out);
            }
            return;
        }
        let sep = seps[i].as_str();
        if (sep == "\n" || sep == " ") && text.len() <= size {
            out.push((base, text.to_string()));
            return;
        }
        if sep == " " {
            split_words(text, base, size, overlap, out);
            return;
        }
        if sep == "\n" {
            split_lines(text, base, seps, i, size, overlap, out);
            return;
        }
        let cuts = cut_points(text, sep);
        if !cuts.is_empty() {
            let mut starts = Vec::with_capacity(cuts.len() + 1);
            starts.push(0usize);
            starts.extend(cuts);
            for (j, &s) in starts.iter().enumerate() {
                let e = starts.get(j + 1).copied().unwrap_or(text.len());
                let piece = &text[s..e];
                if piece.len() <= size {
                    out.push((base + s, piece.to_string()));
                } else {
                    split_recursive(piece, base + s, seps, i + 1, size, overlap, out);
                }
            }
            return;
        }
        i += 1;
    }
}

/// Byte positions where `sep` occurs in `text`, excluding position 0 (a
/// leading separator produces no piece in front of it). The separator stays
/// attached to the piece that follows it so classification sees the keyword.
fn cut_points(text: &str, sep: &str) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = text[from..].find(sep) {
        let abs = from + pos;
        if abs > 0 {
            cuts.push(abs);
        }
        from = abs + sep.len();
    }
    cuts
}

fn split_lines(
    text: &str,
    base: usize,
    seps: &[String],
    sep_idx: usize,
    size: usize,
    overlap: usize,
    out: &mut Vec<(usize, String)>,
) {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    for (pos, b) in text.bytes().enumerate() {
        if b == b'\n' {
            spans.push((start, pos + 1));
            start = pos + 1;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }

    for (off, window) in pack_spans(text, &spans, size, overlap) {
        if window.len() > size {
            // a single line longer than the limit; descend to word windows
            split_recursive(&window, base + off, seps, sep_idx + 1, size, overlap, out);
        } else {
            out.push((base + off, window));
        }
    }
}

fn split_words(text: &str, base: usize, size: usize, overlap: usize, out: &mut Vec<(usize, String)>) {
    let spans = word_spans(text);
    if spans.is_empty() {
        out.push((base, text.to_string()));
        return;
    }
    for (off, window) in pack_spans(text, &spans, size, overlap) {
        out.push((base + off, window));
    }
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (pos, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, pos));
            }
        } else if start.is_none() {
            start = Some(pos);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Greedily pack consecutive unit spans into windows of at most `size` bytes;
/// consecutive windows share roughly `overlap` trailing characters. A single
/// unit larger than `size` becomes a window of its own.
fn pack_spans(text: &str, spans: &[(usize, usize)], size: usize, overlap: usize) -> Vec<(usize, String)> {
    let mut windows = Vec::new();
    if spans.is_empty() {
        return windows;
    }
    let mut start = 0usize;
    loop {
        let window_start = spans[start].0;
        let mut end = start;
        while end < spans.len() {
            if spans[end].1 - window_start > size && end > start {
                break;
            }
            end += 1;
        }
        let window_end = spans[end - 1].1;
        windows.push((window_start, text[window_start..window_end].to_string()));
        if end >= spans.len() {
            break;
        }
        let mut next = end;
        while next > start + 1 && window_end - spans[next - 1].0 <= overlap {
            next -= 1;
        }
        start = next;
    }
    windows
}

fn split_chars(text: &str, base: usize, size: usize, overlap: usize, out: &mut Vec<(usize, String)>) {
    let idxs: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n = idxs.len();
    let mut start = 0usize;
    while start < n {
        let end = (start + size.max(1)).min(n);
        let start_b = idxs[start];
        let end_b = if end < n { idxs[end] } else { text.len() };
        out.push((base + start_b, text[start_b..end_b].to_string()));
        if end >= n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
}

fn count_newlines(s: &str) -> u32 {
    s.bytes().filter(|&b| b == b'\n').count() as u32
}

/// Classification is a pure function of chunk content: the first non-blank
/// line decides the kind.
fn classify(content: &str, language: &str) -> ChunkKind {
    let Some(line) = content.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return ChunkKind::Unknown;
    };
    match language {
        "python" | "py" => classify_python(line),
        "rust" | "rs" => classify_rust(line),
        _ => ChunkKind::CodeBlock,
    }
}

fn classify_python(line: &str) -> ChunkKind {
    if line.starts_with("class ") {
        ChunkKind::Class
    } else if line.contains("__init__(") && line.contains("def ") {
        ChunkKind::Constructor
    } else if line.starts_with("async def ") {
        ChunkKind::AsyncFunction
    } else if line.starts_with("def ") {
        ChunkKind::Function
    } else if line.starts_with("import ") || line.starts_with("from ") || line.starts_with("if __name__") {
        ChunkKind::ModuleSetup
    } else {
        ChunkKind::CodeBlock
    }
}

fn classify_rust(line: &str) -> ChunkKind {
    let l = line.strip_prefix("pub ").unwrap_or(line);
    if l.starts_with("struct ") || l.starts_with("enum ") || l.starts_with("trait ") || l.starts_with("impl ") {
        ChunkKind::Class
    } else if l.starts_with("async fn ") {
        ChunkKind::AsyncFunction
    } else if l.starts_with("fn new(") {
        ChunkKind::Constructor
    } else if l.starts_with("fn ") {
        ChunkKind::Function
    } else if l.starts_with("use ") || l.starts_with("mod ") || l.starts_with("extern crate ") {
        ChunkKind::ModuleSetup
    } else {
        ChunkKind::CodeBlock
    }
}
