//! Pagination cursor.
//!
//! The offset only moves forward after a cycle that accepted at least one new
//! record. A page of nothing but duplicates leaves it where it was, so the next
//! cycle asks for the same window again.

use crate::error::Result;
use crate::history::HistoryStore;
use tracing::debug;

/// Compute the offset for the next fetch.
pub fn next_offset(current_offset: usize, page_size: usize, had_new_results: bool) -> usize {
    if had_new_results {
        current_offset + page_size
    } else {
        current_offset
    }
}

/// Position in a backend's result ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    /// Continuation token for backends that paginate by token.
    pub token: Option<String>,
}

impl Cursor {
    pub fn new(offset: usize) -> Self {
        Self {
            offset,
            token: None,
        }
    }

    /// Start where the history left off: one accepted record per line.
    pub fn resume(store: &HistoryStore) -> Result<Self> {
        let offset = store.count()?;
        debug!(path = ?store.path(), offset, "Resuming cursor from history");
        Ok(Self::new(offset))
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Cursor after a cycle.
    ///
    /// The token moves with the offset: a cycle with nothing new keeps the old
    /// token so the same page is requested again.
    pub fn advance(&self, page_size: usize, had_new_results: bool, next_token: Option<String>) -> Self {
        let offset = next_offset(self.offset, page_size, had_new_results);
        let token = if had_new_results {
            next_token.or_else(|| self.token.clone())
        } else {
            self.token.clone()
        };
        Self { offset, token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_next_offset_algebra() {
        for current in [0usize, 1, 10, 37, 1_000_000] {
            for page in [1usize, 10, 25, 100] {
                assert_eq!(next_offset(current, page, true), current + page);
                assert_eq!(next_offset(current, page, false), current);
            }
        }
    }

    #[test]
    fn test_advance_holds_token_without_new_results() {
        let cursor = Cursor::new(20).with_token(Some("tok-1".to_string()));

        let held = cursor.advance(10, false, Some("tok-2".to_string()));
        assert_eq!(held, cursor);

        let moved = cursor.advance(10, true, Some("tok-2".to_string()));
        assert_eq!(moved.offset, 30);
        assert_eq!(moved.token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn test_resume_counts_history() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("arxiv_records.jsonl");
        std::fs::write(&path, "{\"title\":\"a\"}\n{\"title\":\"b\"}\ngarbage\n{\"title\":\"c\"}\n")?;

        let cursor = Cursor::resume(&HistoryStore::new(&path))?;
        assert_eq!(cursor, Cursor::new(3));
        Ok(())
    }
}
