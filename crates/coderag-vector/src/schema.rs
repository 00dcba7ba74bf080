//! Arrow schema for the indexed-point table. One row per chunk: the payload
//! columns plus a fixed-size embedding vector whose width is inferred at
//! collection bootstrap.

use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub fn build_points_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("source_path", DataType::Utf8, false),
        Field::new("start_line", DataType::Int32, false),
        Field::new("end_line", DataType::Int32, false),
        Field::new("chunk_kind", DataType::Utf8, false),
        Field::new("searchable_text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
            true,
        ),
    ]))
}
