//! Score normalization and linear fusion.
//!
//! Both sub-indexes score on their own scales, so each result list is min-max
//! normalized independently before the weighted sum. Documents found by only
//! one method are kept and merely score 0.0 on the side that missed them.

use coderag_core::types::{SearchResult, SearchType};

/// Min-max scale scores into [0,1]. A uniform list maps to all 1.0 rather
/// than dividing by zero (a uniform result set is uniformly relevant); an
/// empty list stays empty.
pub fn normalize_scores(results: &[SearchResult]) -> Vec<f32> {
    if results.is_empty() {
        return Vec::new();
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for r in results {
        min = min.min(r.score);
        max = max.max(r.score);
    }
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; results.len()];
    }
    results.iter().map(|r| (r.score - min) / (max - min)).collect()
}

/// Fuse two result lists: `(1-alpha)·bm25 + alpha·vector` over the union of
/// document ids. The output is unsorted; callers sort and truncate.
pub fn fuse_scores(bm25: &[SearchResult], vector: &[SearchResult], alpha: f32) -> Vec<SearchResult> {
    let bm25_norm = normalize_scores(bm25);
    let vector_norm = normalize_scores(vector);

    use std::collections::{HashMap, HashSet};
    let vector_by_id: HashMap<&str, (usize, f32)> = vector
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.as_str(), (i, vector_norm[i])))
        .collect();
    let bm25_ids: HashSet<&str> = bm25.iter().map(|r| r.id.as_str()).collect();

    let mut fused = Vec::with_capacity(bm25.len() + vector.len());
    for (i, r) in bm25.iter().enumerate() {
        let vector_score = vector_by_id.get(r.id.as_str()).map(|(_, s)| *s).unwrap_or(0.0);
        let payload = r
            .payload
            .clone()
            .or_else(|| vector_by_id.get(r.id.as_str()).and_then(|(vi, _)| vector[*vi].payload.clone()));
        fused.push(SearchResult {
            id: r.id.clone(),
            score: (1.0 - alpha) * bm25_norm[i] + alpha * vector_score,
            payload,
            search_type: SearchType::Hybrid,
        });
    }
    for (i, r) in vector.iter().enumerate() {
        if bm25_ids.contains(r.id.as_str()) {
            continue;
        }
        fused.push(SearchResult {
            id: r.id.clone(),
            score: alpha * vector_norm[i],
            payload: r.payload.clone(),
            search_type: SearchType::Hybrid,
        });
    }
    fused
}
