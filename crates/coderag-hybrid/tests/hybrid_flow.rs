use std::sync::atomic::{AtomicUsize, Ordering};

use coderag_core::traits::Embedder;
use coderag_core::types::{Chunk, ChunkKind, SearchType};
use coderag_embed::HashEmbedder;
use coderag_hybrid::{HybridRetriever, DEFAULT_ALPHA};
use coderag_vector::VectorStore;

fn make_chunk(path: &str, start: u32, content: &str) -> Chunk {
    let lines = content.lines().count().max(1) as u32;
    Chunk {
        content: content.to_string(),
        source_path: path.to_string(),
        start_line: start,
        end_line: start + lines - 1,
        kind: ChunkKind::Function,
        content_hash: Chunk::hash_content(content),
    }
}

// Comment words double as clean alphanumeric tokens for both the keyword
// tokenizer and the hash embedder.
fn sample_chunks() -> Vec<Chunk> {
    vec![
        make_chunk("src/config.py", 1, "def load():\n    return parse(path)  # reads the toml config file"),
        make_chunk("src/http.py", 1, "def fetch(url):\n    return get(url)  # downloads html web page"),
        make_chunk("src/zoo.py", 1, "def feed():\n    eat(hay)  # zebra feeding chores"),
    ]
}

async fn open_retriever(uri: &str) -> anyhow::Result<HybridRetriever> {
    let store = VectorStore::connect(uri, "code_chunks", Box::new(HashEmbedder::new(64))).await?;
    Ok(HybridRetriever::new(store, DEFAULT_ALPHA).await)
}

/// Succeeds for the first `ok_calls` embedding batches, then fails. Lets a
/// test index normally and then watch the vector side go dark at query time.
struct CountdownEmbedder {
    ok_calls: usize,
    calls: AtomicUsize,
}

impl Embedder for CountdownEmbedder {
    fn dim(&self) -> usize {
        64
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.ok_calls {
            let inner = HashEmbedder::new(64);
            return inner.embed_batch(texts);
        }
        anyhow::bail!("vector backend unreachable")
    }
}

#[tokio::test]
async fn index_then_search_returns_hydrated_hybrid_results() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut retriever = open_retriever(&tmp.path().to_string_lossy()).await?;

    let indexed = retriever.index_chunks(&sample_chunks()).await?;
    assert_eq!(indexed, 3);
    assert!(retriever.keyword_ready());

    let results = retriever.search("toml config file", 3).await?;
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.search_type, SearchType::Hybrid);
        assert!(result.score.is_finite());
    }
    let top_payload = results[0].payload.as_ref().expect("top hit is hydrated");
    assert_eq!(top_payload.source_path, "src/config.py");
    Ok(())
}

#[tokio::test]
async fn single_method_documents_survive_fusion() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut retriever = open_retriever(&tmp.path().to_string_lossy()).await?;
    retriever.index_chunks(&sample_chunks()).await?;

    // "zebra" matches exactly one document by keyword; the vector side still
    // ranks every chunk, so the others arrive through that branch only.
    let keyword_hits = retriever.search_bm25("zebra", 9).await;
    assert_eq!(keyword_hits.len(), 1);
    assert_eq!(keyword_hits[0].payload.as_ref().unwrap().source_path, "src/zoo.py");

    let fused = retriever.search("zebra", 3).await?;
    let paths: Vec<String> = fused
        .iter()
        .filter_map(|r| r.payload.as_ref().map(|p| p.source_path.clone()))
        .collect();
    assert!(paths.contains(&"src/zoo.py".to_string()));
    assert!(fused.len() > 1, "vector-only documents are penalized, not excluded");
    Ok(())
}

#[tokio::test]
async fn vector_outage_degrades_to_bm25_only() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    // two successful batches: the bootstrap probe and the indexing pass
    let embedder = Box::new(CountdownEmbedder { ok_calls: 2, calls: AtomicUsize::new(0) });
    let store = VectorStore::connect(&tmp.path().to_string_lossy(), "code_chunks", embedder).await?;
    let mut retriever = HybridRetriever::new(store, DEFAULT_ALPHA).await;

    let indexed = retriever.index_chunks(&sample_chunks()).await?;
    assert_eq!(indexed, 3);

    assert!(retriever.search_vector("zebra", 5, None).await.is_empty());

    let results = retriever.search("zebra", 5).await?;
    assert!(!results.is_empty(), "BM25 results still come back when the vector side is down");
    assert_eq!(results[0].payload.as_ref().unwrap().source_path, "src/zoo.py");
    Ok(())
}

#[tokio::test]
async fn empty_corpus_returns_empty_from_all_methods() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let retriever = open_retriever(&tmp.path().to_string_lossy()).await?;

    assert!(retriever.search_bm25("anything", 5).await.is_empty());
    assert!(retriever.search_vector("anything", 5, None).await.is_empty());
    assert!(retriever.search("anything", 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn reindexing_refreshes_the_keyword_corpus() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut retriever = open_retriever(&tmp.path().to_string_lossy()).await?;

    retriever
        .index_chunks(&[make_chunk("src/a.py", 1, "def a():\n    pass  # oldmarker text")])
        .await?;
    assert_eq!(retriever.search_bm25("oldmarker", 5).await.len(), 1);

    retriever
        .index_chunks(&[make_chunk("src/a.py", 1, "def a():\n    pass  # freshmarker text")])
        .await?;
    assert!(retriever.search_bm25("oldmarker", 5).await.is_empty());
    assert_eq!(retriever.search_bm25("freshmarker", 5).await.len(), 1);
    Ok(())
}
