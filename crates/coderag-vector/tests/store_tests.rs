use std::sync::atomic::{AtomicUsize, Ordering};

use coderag_core::traits::Embedder;
use coderag_core::types::{Chunk, ChunkKind};
use coderag_embed::HashEmbedder;
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

async fn open_store(uri: &str) -> anyhow::Result<VectorStore> {
    VectorStore::connect(uri, "code_chunks", Box::new(HashEmbedder::new(64))).await
}

/// Succeeds for the bootstrap probe, then fails every later batch.
struct FlakyEmbedder {
    calls: AtomicUsize,
}

impl Embedder for FlakyEmbedder {
    fn dim(&self) -> usize {
        64
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(texts.iter().map(|_| vec![0.5; 64]).collect());
        }
        anyhow::bail!("embedding backend unavailable")
    }
}

#[tokio::test]
async fn bootstrap_is_idempotent() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();

    let store = open_store(&uri).await?;
    assert_eq!(store.get_chunk_count().await, 0);
    drop(store);

    // a second connect against the same database must not fail or reset data
    let store = open_store(&uri).await?;
    assert_eq!(store.get_chunk_count().await, 0);
    assert_eq!(store.dim(), 64);
    Ok(())
}

#[tokio::test]
async fn index_chunks_reports_indexed_count() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    let chunks = vec![
        make_chunk("src/config.py", 1, "def load_config():\n    return parse(CONFIG_PATH)"),
        make_chunk("src/config.py", 10, "def save_config(data):\n    write(CONFIG_PATH, data)"),
        make_chunk("src/http.py", 1, "def fetch_page(url):\n    return client.get(url)"),
    ];
    let indexed = store.index_chunks(&chunks).await?;
    assert_eq!(indexed, 3);
    assert_eq!(store.get_chunk_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn search_returns_payloads_with_scores() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    store
        .index_chunks(&[
            make_chunk("src/config.py", 1, "def load():\n    return parse(path)  # reads the toml config file"),
            make_chunk("src/http.py", 1, "def fetch(url):\n    return get(url)  # downloads html web page"),
        ])
        .await?;

    let results = store.search("toml config file", 2, None).await;
    assert_eq!(results.len(), 2);
    let top = &results[0];
    let payload = top.payload.as_ref().expect("vector hits carry payloads");
    assert_eq!(payload.source_path, "src/config.py");
    assert_eq!(payload.start_line, 1);
    assert_eq!(payload.searchable_text, payload.content.to_lowercase());
    assert!(top.score >= results[1].score);
    Ok(())
}

#[tokio::test]
async fn failed_embeddings_index_nothing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let embedder = Box::new(FlakyEmbedder { calls: AtomicUsize::new(0) });
    let store = VectorStore::connect(&tmp.path().to_string_lossy(), "code_chunks", embedder).await?;

    let chunks = vec![make_chunk("src/x.py", 1, "def x():\n    pass")];
    let indexed = store.index_chunks(&chunks).await?;
    assert_eq!(indexed, 0, "zero-vector sentinels are excluded from indexing");
    assert_eq!(store.get_chunk_count().await, 0);

    // query embedding also fails, which degrades to an empty result list
    assert!(store.search("anything", 5, None).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn file_filter_restricts_results_by_glob() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    store
        .index_chunks(&[
            make_chunk("src/alpha.py", 1, "def helper():\n    return 1  # shared helper logic"),
            make_chunk("lib/beta.py", 1, "def helper():\n    return 2  # shared helper logic"),
        ])
        .await?;

    let results = store.search("shared helper logic", 5, Some("src/*.py")).await;
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.payload.as_ref().unwrap().source_path, "src/alpha.py");
    }
    Ok(())
}

#[tokio::test]
async fn reindexing_a_file_replaces_its_chunks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    store
        .index_chunks(&[
            make_chunk("src/a.py", 1, "def old_one():\n    pass"),
            make_chunk("src/a.py", 10, "def old_two():\n    pass"),
            make_chunk("src/b.py", 1, "def keep_me():\n    pass"),
        ])
        .await?;
    assert_eq!(store.get_chunk_count().await, 3);

    let indexed = store
        .index_chunks(&[make_chunk("src/a.py", 1, "def rewritten():\n    pass")])
        .await?;
    assert_eq!(indexed, 1);
    assert_eq!(store.get_chunk_count().await, 2, "old a.py chunks were replaced wholesale");

    let rows = store.scroll(100).await?;
    let paths: Vec<&str> = rows.iter().map(|(_, p)| p.source_path.as_str()).collect();
    assert!(paths.contains(&"src/b.py"));
    let a_rows: Vec<_> = rows.iter().filter(|(_, p)| p.source_path == "src/a.py").collect();
    assert_eq!(a_rows.len(), 1);
    assert!(a_rows[0].1.content.contains("rewritten"));
    Ok(())
}

#[tokio::test]
async fn scroll_and_retrieve_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    let chunks = vec![
        make_chunk("src/a.py", 1, "def first():\n    pass"),
        make_chunk("src/b.py", 1, "def second():\n    pass"),
    ];
    store.index_chunks(&chunks).await?;

    let rows = store.scroll(100).await?;
    assert_eq!(rows.len(), 2);

    let ids: Vec<String> = rows.iter().map(|(id, _)| id.clone()).collect();
    let fetched = store.retrieve(&ids).await?;
    assert_eq!(fetched.len(), 2);
    for (id, payload) in &fetched {
        assert!(ids.contains(id));
        assert!(!payload.content.is_empty());
    }

    let none = store.retrieve(&[]).await?;
    assert!(none.is_empty());
    Ok(())
}

#[tokio::test]
async fn clear_collection_leaves_an_empty_queryable_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = open_store(&tmp.path().to_string_lossy()).await?;

    store
        .index_chunks(&[make_chunk("src/a.py", 1, "def gone_soon():\n    pass")])
        .await?;
    assert_eq!(store.get_chunk_count().await, 1);

    store.clear_collection().await?;
    assert_eq!(store.get_chunk_count().await, 0);
    assert!(store.search("gone_soon", 5, None).await.is_empty());
    assert!(store.scroll(10).await?.is_empty());
    Ok(())
}
