//! LanceDB-backed embedding index: a persistent collection of
//! (vector, payload) points with cosine nearest-neighbor search.
//!
//! Failure policy per the retrieval contract: embedding failures become
//! zero-vector sentinels, a failed upsert batch is logged and skipped, and
//! `search` degrades to an empty result list instead of raising.

use anyhow::{anyhow, Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::{debug, warn};

use coderag_core::traits::Embedder;
use coderag_core::types::{Chunk, ChunkId, ChunkKind, ChunkPayload, SearchResult, SearchType};

pub mod schema;
use schema::build_points_schema;

/// Points are upserted in fixed-size batches to bound memory and request
/// size, and to keep error attribution per batch unambiguous.
const UPSERT_BATCH_SIZE: usize = 100;

pub struct VectorStore {
    db: Connection,
    collection: String,
    embedder: Box<dyn Embedder>,
    dim: usize,
}

impl VectorStore {
    /// Open the database and make sure the collection exists. The vector
    /// dimensionality is inferred by embedding a short probe string once.
    pub async fn connect(db_uri: &str, collection: &str, embedder: Box<dyn Embedder>) -> Result<Self> {
        let db = connect(db_uri)
            .execute()
            .await
            .with_context(|| format!("connecting to vector database at {db_uri}"))?;
        let probe = embedder
            .embed_batch(&["test".to_string()])
            .context("probing embedding dimension")?;
        let dim = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow!("embedding model returned no probe vector"))?;
        let store = Self { db, collection: collection.to_string(), embedder, dim };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Idempotent: a no-op when the collection already exists.
    async fn ensure_collection(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.collection) {
            return Ok(());
        }
        let schema = build_points_schema(self.dim);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        self.db.create_table(&self.collection, Box::new(iter)).execute().await?;
        debug!("created collection '{}' with vector size {}", self.collection, self.dim);
        Ok(())
    }

    /// Embed a batch of texts. On model failure every input maps to a
    /// zero-vector sentinel; callers must exclude all-zero vectors from
    /// indexing.
    pub fn generate_embeddings(&self, texts: &[String]) -> Vec<Vec<f32>> {
        match self.embedder.embed_batch(texts) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("embedding generation failed: {e:#}");
                vec![vec![0.0; self.dim]; texts.len()]
            }
        }
    }

    /// Index chunks, replacing any previous chunks of the same source files.
    /// Returns the number of points actually indexed, which is lower than
    /// `chunks.len()` when embeddings or batches fail.
    pub async fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.generate_embeddings(&texts);

        let mut points: Vec<(ChunkId, ChunkPayload, Vec<f32>)> = Vec::new();
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            if vector.iter().all(|v| *v == 0.0) {
                continue;
            }
            points.push((chunk.chunk_id(), ChunkPayload::from_chunk(chunk), vector));
        }
        if points.is_empty() {
            warn!("no chunks to index (all embeddings failed)");
            return Ok(0);
        }

        let table = self.db.open_table(&self.collection).execute().await?;

        // Re-indexing a file replaces its old chunks wholesale.
        let mut paths: Vec<&str> = points.iter().map(|(_, p, _)| p.source_path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        for path in paths {
            if let Err(e) = table.delete(&format!("source_path = '{}'", sql_escape(path))).await {
                warn!("failed to drop previous chunks for {path}: {e:#}");
            }
        }

        let mut indexed = 0usize;
        for (batch_no, batch) in points.chunks(UPSERT_BATCH_SIZE).enumerate() {
            match self.upsert_batch(&table, batch).await {
                Ok(()) => {
                    indexed += batch.len();
                    debug!("indexed batch of {} chunks", batch.len());
                }
                Err(e) => warn!("failed to index batch {batch_no}: {e:#}"),
            }
        }
        Ok(indexed)
    }

    async fn upsert_batch(&self, table: &Table, batch: &[(ChunkId, ChunkPayload, Vec<f32>)]) -> Result<()> {
        let record_batch = self.points_to_record_batch(batch)?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        let _ = merge.execute(reader).await?;
        Ok(())
    }

    fn points_to_record_batch(&self, points: &[(ChunkId, ChunkPayload, Vec<f32>)]) -> Result<RecordBatch> {
        let schema = build_points_schema(self.dim);
        let mut ids = Vec::new();
        let mut contents = Vec::new();
        let mut source_paths = Vec::new();
        let mut start_lines = Vec::new();
        let mut end_lines = Vec::new();
        let mut kinds = Vec::new();
        let mut searchables = Vec::new();
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
        for (id, payload, vector) in points {
            ids.push(id.clone());
            contents.push(payload.content.clone());
            source_paths.push(payload.source_path.clone());
            start_lines.push(payload.start_line as i32);
            end_lines.push(payload.end_line as i32);
            kinds.push(payload.kind.as_str().to_string());
            searchables.push(payload.searchable_text.clone());
            vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
        }
        let record_batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(source_paths)),
                Arc::new(Int32Array::from(start_lines)),
                Arc::new(Int32Array::from(end_lines)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(searchables)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim as i32,
                )),
            ],
        )?;
        Ok(record_batch)
    }

    /// Cosine nearest-neighbor search. Degrades to an empty result list on
    /// any backend failure so hybrid callers can keep going.
    pub async fn search(&self, query: &str, top_k: usize, file_filter: Option<&str>) -> Vec<SearchResult> {
        match self.try_search(query, top_k, file_filter).await {
            Ok(results) => results,
            Err(e) => {
                warn!("semantic search failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str, top_k: usize, file_filter: Option<&str>) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_batch(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model returned no query vector"))?;
        let table = self.db.open_table(&self.collection).execute().await?;
        let mut q = table
            .vector_search(query_vec)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(pattern) = file_filter {
            q = q.only_if(format!("source_path LIKE '{}'", sql_escape(&glob_to_like(pattern))));
        }
        let mut stream = q.execute().await?;
        let mut results = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let columns = PayloadColumns::bind(&batch)?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for i in 0..batch.num_rows() {
                let (id, payload) = columns.row(i);
                let score = distances.map(|d| 1.0 - d.value(i)).unwrap_or(0.0);
                results.push(SearchResult { id, score, payload: Some(payload), search_type: SearchType::Vector });
            }
        }
        Ok(results)
    }

    /// Bulk-read up to `limit` (id, payload) rows so the keyword index can
    /// rebuild from the same payload store.
    pub async fn scroll(&self, limit: usize) -> Result<Vec<(ChunkId, ChunkPayload)>> {
        let table = self.db.open_table(&self.collection).execute().await?;
        let mut stream = table.query().limit(limit).execute().await?;
        let mut rows = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let columns = PayloadColumns::bind(&batch)?;
            for i in 0..batch.num_rows() {
                rows.push(columns.row(i));
            }
        }
        Ok(rows)
    }

    /// Batch-fetch payloads by point id.
    pub async fn retrieve(&self, ids: &[ChunkId]) -> Result<Vec<(ChunkId, ChunkPayload)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.db.open_table(&self.collection).execute().await?;
        let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", sql_escape(id))).collect();
        let mut stream = table
            .query()
            .only_if(format!("id IN ({})", quoted.join(", ")))
            .execute()
            .await?;
        let mut rows = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let columns = PayloadColumns::bind(&batch)?;
            for i in 0..batch.num_rows() {
                rows.push(columns.row(i));
            }
        }
        Ok(rows)
    }

    pub async fn get_chunk_count(&self) -> usize {
        match self.try_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("failed to get chunk count: {e:#}");
                0
            }
        }
    }

    async fn try_count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.collection).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    /// Drop and immediately recreate the collection so it stays queryable,
    /// just empty.
    pub async fn clear_collection(&self) -> Result<()> {
        self.db.drop_table(&self.collection).await?;
        self.ensure_collection().await
    }
}

/// Borrowed views over one record batch's payload columns.
struct PayloadColumns<'a> {
    ids: &'a StringArray,
    contents: &'a StringArray,
    source_paths: &'a StringArray,
    start_lines: &'a Int32Array,
    end_lines: &'a Int32Array,
    kinds: &'a StringArray,
    searchables: &'a StringArray,
}

impl<'a> PayloadColumns<'a> {
    fn bind(batch: &'a RecordBatch) -> Result<Self> {
        Ok(Self {
            ids: column_str(batch, "id")?,
            contents: column_str(batch, "content")?,
            source_paths: column_str(batch, "source_path")?,
            start_lines: column_i32(batch, "start_line")?,
            end_lines: column_i32(batch, "end_line")?,
            kinds: column_str(batch, "chunk_kind")?,
            searchables: column_str(batch, "searchable_text")?,
        })
    }

    fn row(&self, i: usize) -> (ChunkId, ChunkPayload) {
        (
            self.ids.value(i).to_string(),
            ChunkPayload {
                content: self.contents.value(i).to_string(),
                source_path: self.source_paths.value(i).to_string(),
                start_line: self.start_lines.value(i) as u32,
                end_line: self.end_lines.value(i) as u32,
                kind: ChunkKind::from_label(self.kinds.value(i)),
                searchable_text: self.searchables.value(i).to_string(),
            },
        )
    }
}

fn column_str<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("column '{}' missing or mistyped", name))
}

fn column_i32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow!("column '{}' missing or mistyped", name))
}

fn sql_escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// Translate a shell-style glob into a SQL LIKE pattern.
fn glob_to_like(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '*' => '%',
            '?' => '_',
            c => c,
        })
        .collect()
}
