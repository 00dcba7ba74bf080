//! Domain types shared by the chunker, both indexes, and the fusion layer.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub type ChunkId = String;

/// Coarse structural classification of a chunk, inferred from the first
/// non-blank line of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Class,
    Function,
    AsyncFunction,
    Constructor,
    ModuleSetup,
    CodeBlock,
    Unknown,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::AsyncFunction => "async_function",
            ChunkKind::Constructor => "constructor",
            ChunkKind::ModuleSetup => "module_setup",
            ChunkKind::CodeBlock => "code_block",
            ChunkKind::Unknown => "unknown",
        }
    }

    /// Inverse of `as_str` for payload columns. Unrecognized labels map to
    /// `Unknown` rather than failing a whole row decode.
    pub fn from_label(label: &str) -> Self {
        match label {
            "class" => ChunkKind::Class,
            "function" => ChunkKind::Function,
            "async_function" => ChunkKind::AsyncFunction,
            "constructor" => ChunkKind::Constructor,
            "module_setup" => ChunkKind::ModuleSetup,
            "code_block" => ChunkKind::CodeBlock,
            _ => ChunkKind::Unknown,
        }
    }
}

/// A contiguous span of source text treated as one retrievable unit.
///
/// Chunks from one file are produced in strictly increasing `start_line`
/// order with `end_line >= start_line`. They are rebuilt from current file
/// content on every indexing run and are never persisted standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub source_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: ChunkKind,
    pub content_hash: String,
}

impl Chunk {
    /// Stable identifier across re-indexing runs when content is unchanged:
    /// `{file_stem}_{start_line}_{content_hash}`.
    pub fn chunk_id(&self) -> ChunkId {
        let stem = Path::new(&self.source_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "src".to_string());
        format!("{}_{}_{}", stem, self.start_line, self.content_hash)
    }

    /// Short deterministic hash used for deduplication and identity.
    pub fn hash_content(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex()[..8].to_string()
    }
}

/// The payload attached to every indexed point. `searchable_text` is a
/// lowercase copy of `content`, stored so the keyword index can tokenize
/// straight from the payload store without re-deriving from chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub content: String,
    pub source_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: ChunkKind,
    pub searchable_text: String,
}

impl ChunkPayload {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            source_path: chunk.source_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            kind: chunk.kind,
            searchable_text: chunk.content.to_lowercase(),
        }
    }
}

/// Which retrieval method produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Bm25,
    Vector,
    Hybrid,
}

/// The minimal surface returned by every search method.
///
/// `score` is engine-specific but higher is always better; after fusion it is
/// a weighted sum of two [0,1]-normalized sub-scores. `payload` is absent for
/// keyword-only hits until hydrated, and stays absent if hydration fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub score: f32,
    pub payload: Option<ChunkPayload>,
    pub search_type: SearchType,
}
