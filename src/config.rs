//! Crawl configuration.
//!
//! Everything a cycle needs is passed in explicitly: which backend, what to
//! query, and where that backend's history lives. Nothing depends on the
//! working directory beyond resolving relative paths.

use crate::error::{CrawlError, Result};
use crate::source::arxiv::ArxivOptions;
use crate::source::scholar::ScholarOptions;
use crate::source::semantic_scholar::BulkOptions;
use crate::source::Backend;
use std::path::PathBuf;

/// Default number of records requested per cycle
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default directory for history files
pub const DEFAULT_OUTPUT_DIR: &str = "out";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub backend: Backend,
    /// Backend-specific query expression
    pub query: String,
    pub page_size: usize,
    /// Directory holding the per-backend history files
    pub output_dir: PathBuf,
    /// Explicit history file, overriding `<output_dir>/<backend>_records.jsonl`
    pub history_path: Option<PathBuf>,
    pub arxiv: ArxivOptions,
    pub scholar: ScholarOptions,
    pub semantic_scholar: BulkOptions,
}

impl CrawlConfig {
    /// Configuration with defaults. The Semantic Scholar key is read from the
    /// environment here but only checked when that backend fetches.
    pub fn new(backend: Backend, query: impl Into<String>) -> Self {
        Self {
            backend,
            query: query.into(),
            page_size: DEFAULT_PAGE_SIZE,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            history_path: None,
            arxiv: ArxivOptions::default(),
            scholar: ScholarOptions::default(),
            semantic_scholar: BulkOptions::from_env(),
        }
    }

    /// History file for the configured backend.
    pub fn history_path(&self) -> PathBuf {
        self.history_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(self.backend.history_file_name()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(CrawlError::Config("query must not be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(CrawlError::Config("page size must be positive".to_string()));
        }
        Ok(())
    }
}
