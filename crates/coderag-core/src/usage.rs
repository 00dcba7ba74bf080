//! Append-only usage log for search commands.
//!
//! One JSON object per line: timestamp, query, result count, latency.
//! The file is only ever appended to, never rewritten.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct UsageRecord<'a> {
    timestamp: String,
    query: &'a str,
    result_count: usize,
    latency_ms: u64,
}

pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, query: &str, result_count: usize, latency_ms: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let record = UsageRecord {
            timestamp: Utc::now().to_rfc3339(),
            query,
            result_count,
            latency_ms,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening usage log {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }
}
