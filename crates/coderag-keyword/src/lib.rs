//! Keyword relevance index over the chunk corpus.
//!
//! The index lives entirely in RAM and is rebuilt wholesale from the payload
//! store whenever the corpus changes, since BM25's global document-frequency
//! statistics go stale on any modification. Only document ids and scores come
//! out of a search; payload hydration is the hybrid layer's job.

use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::{doc, Index, TantivyDocument, Term};
use tracing::{debug, warn};

use coderag_core::types::{ChunkId, SearchResult, SearchType};

pub mod tokenizer;
use tokenizer::build_analyzer;

const ANALYZER_NAME: &str = "code_terms";
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// BM25 index with an explicit not-ready state: `rebuild` swaps in a fresh
/// index, a failed build leaves it unusable and `search` returns nothing.
pub struct Bm25Index {
    inner: Option<BuiltIndex>,
}

struct BuiltIndex {
    index: Index,
    id_field: Field,
    text_field: Field,
    doc_count: usize,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn ready(&self) -> bool {
        self.inner.is_some()
    }

    pub fn doc_count(&self) -> usize {
        self.inner.as_ref().map(|b| b.doc_count).unwrap_or(0)
    }

    /// Drop the current index; `search` returns nothing until the next
    /// successful `rebuild`.
    pub fn clear(&mut self) {
        self.inner = None;
    }

    /// Rebuild from scratch over `(id, searchable_text)` documents. Never
    /// raises: a failed build logs a warning and leaves the index not ready.
    pub fn rebuild(&mut self, docs: &[(ChunkId, String)]) {
        self.inner = None;
        match build_index(docs) {
            Ok(built) => {
                debug!("built keyword index over {} documents", built.doc_count);
                self.inner = Some(built);
            }
            Err(e) => warn!("keyword index build failed, BM25 search disabled: {e:#}"),
        }
    }

    /// Score every corpus document against the query and return the `top_k`
    /// best with score > 0. Not-ready indexes and failed searches both
    /// degrade to an empty list.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        let Some(built) = &self.inner else {
            warn!("keyword index not built; returning no BM25 results");
            return Vec::new();
        };
        match built.search(query, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("BM25 search failed: {e:#}");
                Vec::new()
            }
        }
    }
}

fn build_index(docs: &[(ChunkId, String)]) -> Result<BuiltIndex> {
    let mut schema_builder = Schema::builder();
    let id_field = schema_builder.add_text_field("id", STRING | STORED);
    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer(ANALYZER_NAME)
        .set_index_option(IndexRecordOption::WithFreqs);
    let text_field =
        schema_builder.add_text_field("text", TextOptions::default().set_indexing_options(text_indexing));
    let schema = schema_builder.build();

    let index = Index::create_in_ram(schema);
    index.tokenizers().register(ANALYZER_NAME, build_analyzer());

    let mut writer = index.writer(WRITER_HEAP_BYTES)?;
    for (id, searchable_text) in docs {
        writer.add_document(doc!(
            id_field => id.clone(),
            text_field => searchable_text.clone(),
        ))?;
    }
    writer.commit()?;

    Ok(BuiltIndex { index, id_field, text_field, doc_count: docs.len() })
}

impl BuiltIndex {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let tokens = tokenizer::tokenize(query);
        if tokens.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let term_queries: Vec<Box<dyn Query>> = tokens
            .iter()
            .map(|token| {
                Box::new(TermQuery::new(
                    Term::from_field_text(self.text_field, token),
                    IndexRecordOption::WithFreqs,
                )) as Box<dyn Query>
            })
            .collect();
        let query = BooleanQuery::union(term_queries);

        let reader = self.index.reader()?;
        let searcher = reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(top_k))?;

        let mut hits = Vec::new();
        for (score, addr) in top_docs {
            if score <= 0.0 {
                continue;
            }
            let stored: TantivyDocument = searcher.doc(addr)?;
            let id = stored
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            hits.push(SearchResult { id, score, payload: None, search_type: SearchType::Bm25 });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<(ChunkId, String)> {
        vec![
            ("chunk_a".to_string(), "fn parse_config reads the toml config file".to_string()),
            ("chunk_b".to_string(), "async fn fetch_page downloads html over http".to_string()),
            ("chunk_c".to_string(), "config config config parsing helpers".to_string()),
        ]
    }

    #[test]
    fn fresh_index_is_not_ready_and_returns_nothing() {
        let index = Bm25Index::new();
        assert!(!index.ready());
        assert!(index.search("config", 5).is_empty());
    }

    #[test]
    fn rebuild_makes_the_index_searchable() {
        let mut index = Bm25Index::new();
        index.rebuild(&corpus());
        assert!(index.ready());
        assert_eq!(index.doc_count(), 3);

        let hits = index.search("config", 5);
        assert_eq!(hits.len(), 2, "only documents mentioning the term match");
        for hit in &hits {
            assert!(hit.score > 0.0);
            assert_eq!(hit.search_type, SearchType::Bm25);
            assert!(hit.payload.is_none());
        }
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"chunk_a"));
        assert!(ids.contains(&"chunk_c"));
    }

    #[test]
    fn unrelated_queries_match_nothing() {
        let mut index = Bm25Index::new();
        index.rebuild(&corpus());
        assert!(index.search("quaternion", 5).is_empty());
        assert!(index.search("", 5).is_empty());
    }

    #[test]
    fn rebuild_replaces_the_previous_corpus() {
        let mut index = Bm25Index::new();
        index.rebuild(&corpus());
        assert!(!index.search("config", 5).is_empty());

        index.rebuild(&[("only".to_string(), "completely different text".to_string())]);
        assert_eq!(index.doc_count(), 1);
        assert!(index.search("config", 5).is_empty());
        assert_eq!(index.search("different", 5).len(), 1);
    }

    #[test]
    fn empty_corpus_builds_a_degenerate_index() {
        let mut index = Bm25Index::new();
        index.rebuild(&[]);
        assert!(index.ready());
        assert_eq!(index.doc_count(), 0);
        assert!(index.search("anything", 5).is_empty());
    }

    #[test]
    fn top_k_caps_the_result_count() {
        let docs: Vec<(ChunkId, String)> = (0..10)
            .map(|i| (format!("doc_{i}"), format!("shared keyword plus filler {i}")))
            .collect();
        let mut index = Bm25Index::new();
        index.rebuild(&docs);

        let hits = index.search("keyword", 4);
        assert_eq!(hits.len(), 4);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score, "scores sorted descending");
        }
    }

    #[test]
    fn clear_disables_search_until_next_rebuild() {
        let mut index = Bm25Index::new();
        index.rebuild(&corpus());
        index.clear();
        assert!(!index.ready());
        assert!(index.search("config", 5).is_empty());
    }
}
