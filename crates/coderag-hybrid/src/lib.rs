//! Hybrid retriever: the single entry point that queries the keyword and
//! vector indexes, fuses their normalized scores, and returns one ranked,
//! deduplicated result list.

use anyhow::Result;
use tracing::{debug, warn};

use coderag_core::types::{Chunk, SearchResult};
use coderag_keyword::Bm25Index;
use coderag_vector::VectorStore;

pub mod fusion;

/// How many candidates each sub-index is asked for, as a multiple of the
/// requested `top_k`. The two methods' top sets rarely fully overlap, so
/// overfetching gives the fusion more candidates to re-rank.
const OVERFETCH_FACTOR: usize = 3;

/// Upper bound on payload rows pulled when rebuilding the keyword index from
/// the vector store.
const SCROLL_LIMIT: usize = 10_000;

/// Default weight for the vector (semantic) side; BM25 gets the complement.
pub const DEFAULT_ALPHA: f32 = 0.3;

pub struct HybridRetriever {
    store: VectorStore,
    keyword: Bm25Index,
    alpha: f32,
}

impl HybridRetriever {
    /// Wrap an existing vector store. The keyword index is built immediately
    /// from whatever the store already holds.
    pub async fn new(store: VectorStore, alpha: f32) -> Self {
        let mut retriever = Self { store, keyword: Bm25Index::new(), alpha };
        retriever.rebuild_keyword_index().await;
        debug!(
            "initialized hybrid retriever (bm25 weight {:.1}, vector weight {:.1})",
            1.0 - retriever.alpha,
            retriever.alpha
        );
        retriever
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn keyword_ready(&self) -> bool {
        self.keyword.ready()
    }

    /// Index chunks into the vector store, then force a keyword rebuild —
    /// BM25's document-frequency statistics go stale on any corpus change.
    /// Returns the embedding-index count.
    pub async fn index_chunks(&mut self, chunks: &[Chunk]) -> Result<usize> {
        let indexed = self.store.index_chunks(chunks).await?;
        self.rebuild_keyword_index().await;
        Ok(indexed)
    }

    async fn rebuild_keyword_index(&mut self) {
        match self.store.scroll(SCROLL_LIMIT).await {
            Ok(rows) => {
                let docs: Vec<(String, String)> =
                    rows.into_iter().map(|(id, payload)| (id, payload.searchable_text)).collect();
                self.keyword.rebuild(&docs);
            }
            Err(e) => {
                warn!("could not read payload store for keyword index: {e:#}");
                self.keyword.clear();
            }
        }
    }

    /// Query both indexes with `3 × top_k` overfetch, fuse the normalized
    /// scores, and return the merged top `top_k`. A failed sub-search
    /// contributes an empty list; only fusion programming errors propagate.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let overfetch = top_k.saturating_mul(OVERFETCH_FACTOR);
        let bm25_results = self.keyword.search(query, overfetch);
        let vector_results = self.store.search(query, overfetch, None).await;

        let mut fused = fusion::fuse_scores(&bm25_results, &vector_results, self.alpha);
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(top_k);
        self.hydrate_payloads(&mut fused).await;
        debug!("hybrid search returned {} results", fused.len());
        Ok(fused)
    }

    /// BM25-only search with payload hydration, for comparison runs.
    pub async fn search_bm25(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        let mut results = self.keyword.search(query, top_k);
        self.hydrate_payloads(&mut results).await;
        results
    }

    /// Vector-only search, for comparison runs.
    pub async fn search_vector(&self, query: &str, top_k: usize, file_filter: Option<&str>) -> Vec<SearchResult> {
        self.store.search(query, top_k, file_filter).await
    }

    /// Keyword-only hits carry no payload; fetch the missing ones from the
    /// point store in one batch. A failed lookup leaves the hits in place
    /// without payloads rather than dropping them.
    async fn hydrate_payloads(&self, results: &mut [SearchResult]) {
        let missing: Vec<String> =
            results.iter().filter(|r| r.payload.is_none()).map(|r| r.id.clone()).collect();
        if missing.is_empty() {
            return;
        }
        match self.store.retrieve(&missing).await {
            Ok(points) => {
                let by_id: std::collections::HashMap<_, _> = points.into_iter().collect();
                for result in results.iter_mut() {
                    if result.payload.is_none() {
                        if let Some(payload) = by_id.get(&result.id) {
                            result.payload = Some(payload.clone());
                        }
                    }
                }
            }
            Err(e) => warn!("failed to retrieve some payloads: {e:#}"),
        }
    }
}
