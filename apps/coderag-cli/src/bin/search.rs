use std::env;
use std::time::Instant;

use coderag_core::config::{expand_path, Config};
use coderag_core::usage::UsageLog;
use coderag_embed::get_default_embedder;
use coderag_hybrid::HybridRetriever;
use coderag_vector::VectorStore;

enum Mode {
    Hybrid,
    Bm25,
    Vector,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut query: Option<String> = None;
    let mut limit = 5usize;
    let mut mode = Mode::Hybrid;
    let mut collection: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" | "-n" => {
                if let Some(n) = args.get(i + 1).and_then(|v| v.parse::<usize>().ok()) {
                    limit = n;
                    i += 1;
                } else {
                    eprintln!("Error: --limit requires a number");
                    std::process::exit(1);
                }
            }
            "--bm25" => mode = Mode::Bm25,
            "--vector" => mode = Mode::Vector,
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
            _ if !args[i].starts_with('-') => {
                if query.is_none() {
                    query = Some(args[i].clone());
                }
            }
            other => {
                eprintln!("Error: unknown flag '{other}'");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(query) = query else {
        print_usage();
        std::process::exit(1);
    };

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.retrieval().map_err(|e| {
        eprintln!("Error: {}", e);
        e
    })?;
    let collection = collection.unwrap_or_else(|| settings.collection.clone());

    let embedder = get_default_embedder().map_err(|e| {
        eprintln!("Failed to load embedding model: {e:#}");
        e
    })?;
    let store = VectorStore::connect(&settings.db_uri, &collection, embedder).await.map_err(|e| {
        eprintln!("Failed to initialize vector store: {e:#}");
        e
    })?;
    let retriever = HybridRetriever::new(store, settings.alpha).await;

    let started = Instant::now();
    let results = match mode {
        Mode::Hybrid => retriever.search(&query, limit).await?,
        Mode::Bm25 => retriever.search_bm25(&query, limit).await,
        Mode::Vector => retriever.search_vector(&query, limit, None).await,
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    if results.is_empty() {
        println!("No results found for query: '{}'", query);
    } else {
        println!("Found {} results for: \"{}\"", results.len(), query);
        for (rank, result) in results.iter().enumerate() {
            match &result.payload {
                Some(p) => {
                    println!(
                        "\n{}. {} (score {:.3})  {}:{}-{}",
                        rank + 1,
                        p.kind.as_str(),
                        result.score,
                        p.source_path,
                        p.start_line,
                        p.end_line
                    );
                    for line in p.content.lines() {
                        println!("    {}", line);
                    }
                }
                None => println!(
                    "\n{}. (score {:.3})  id={}  [payload unavailable]",
                    rank + 1,
                    result.score,
                    result.id
                ),
            }
        }
    }

    if let Some(log_path) = &settings.usage_log {
        let log = UsageLog::new(expand_path(log_path));
        if let Err(e) = log.append(&query, results.len(), latency_ms) {
            eprintln!("Warning: could not write usage log: {e:#}");
        }
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: coderag-search '<query>' [--limit N] [--bm25 | --vector] [--collection NAME]");
    println!("Hybrid search over the indexed codebase; --bm25 or --vector run a single");
    println!("sub-index for comparison.");
}
