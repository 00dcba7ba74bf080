use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use coderag_core::chunker::CodeChunker;
use coderag_core::config::{Config, RetrievalSettings};
use coderag_core::types::Chunk;
use coderag_embed::get_default_embedder;
use coderag_hybrid::HybridRetriever;
use coderag_vector::VectorStore;

const EXCLUDED_DIRS: &[&str] = &[
    ".git", ".hg", ".svn", "target", "node_modules", "__pycache__", ".venv", "venv",
    ".pytest_cache", "dist", "build", ".idea", ".vscode",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "go", "java", "c", "cc", "cpp", "h", "hpp", "rb", "md", "toml",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut root: Option<PathBuf> = None;
    let mut collection: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--collection" | "-c" => {
                if i + 1 < args.len() {
                    collection = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --collection requires a name");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ if !args[i].starts_with('-') => root = Some(PathBuf::from(&args[i])),
            other => {
                eprintln!("Error: unknown flag '{other}'");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.retrieval().map_err(|e| {
        eprintln!("Error: {}", e);
        e
    })?;
    let root = root.unwrap_or_else(|| PathBuf::from("."));
    let collection = collection.unwrap_or_else(|| settings.collection.clone());

    println!("coderag indexer\n===============");
    println!("Root:       {}", root.display());
    println!("Collection: {}", collection);
    println!("Database:   {}", settings.db_uri);

    // Component init failures are the only hard exits; everything after this
    // degrades per file or per batch.
    let embedder = get_default_embedder().map_err(|e| {
        eprintln!("Failed to load embedding model: {e:#}");
        e
    })?;
    let store = VectorStore::connect(&settings.db_uri, &collection, embedder).await.map_err(|e| {
        eprintln!("Failed to initialize vector store: {e:#}");
        e
    })?;
    let mut retriever = HybridRetriever::new(store, settings.alpha).await;

    let files = collect_source_files(&root);
    if files.is_empty() {
        println!("No source files found under {}", root.display());
        return Ok(());
    }
    println!("Found {} source files", files.len());

    let chunk_started = Instant::now();
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    let mut chunks: Vec<Chunk> = Vec::new();
    for file in &files {
        let chunker = chunker_for(file, &settings);
        chunks.extend(chunker.chunk_file(file));
        pb.inc(1);
    }
    pb.finish_with_message("chunking done");
    let chunk_secs = chunk_started.elapsed().as_secs_f64();
    println!("Chunked {} files into {} chunks ({:.2}s)", files.len(), chunks.len(), chunk_secs);

    println!("Indexing chunks (embedding every chunk, this can take a while)...");
    let index_started = Instant::now();
    let indexed = retriever.index_chunks(&chunks).await?;
    let index_secs = index_started.elapsed().as_secs_f64();

    println!("\nIndexing summary");
    println!("----------------");
    println!("Files processed: {}", files.len());
    println!("Chunks created:  {}", chunks.len());
    println!("Chunks indexed:  {}", indexed);
    println!("Total time:      {:.2}s", chunk_secs + index_secs);
    println!(
        "Collection '{}' now holds {} chunks",
        collection,
        retriever.store().get_chunk_count().await
    );
    println!("\nSearch with: cargo run --bin coderag-search -- '<query>'");
    Ok(())
}

fn print_usage() {
    println!("Usage: coderag-indexer [root_dir] [--collection NAME]");
    println!("Walks root_dir (default .), chunks every source file, and indexes the");
    println!("result into the configured vector database and keyword index.");
}

fn collect_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !EXCLUDED_DIRS.contains(&e.file_name().to_str().unwrap_or("")))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

fn chunker_for(path: &Path, settings: &RetrievalSettings) -> CodeChunker {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let language = match ext {
        "py" => "python",
        "rs" => "rust",
        other => other,
    };
    CodeChunker::new(language, settings.chunk_size, settings.chunk_overlap)
}
