//! One fetch cycle: fetch, filter against history, append, advance.
//!
//! Cycles run strictly one after another. A failed fetch or append returns the
//! error and leaves the cursor where it was.

use crate::config::CrawlConfig;
use crate::error::Result;
use crate::history::{filter_new, HistoryStore};
use crate::paginator::Cursor;
use crate::record::Record;
use crate::source::{Page, Source};
use tracing::info;

/// Outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Records returned by the backend
    pub fetched: usize,
    /// Records that were new and got appended, in fetch order
    pub accepted: Vec<Record>,
    /// Cursor for the next cycle
    pub cursor: Cursor,
    /// The backend had nothing beyond this page
    pub complete: bool,
}

impl CycleReport {
    pub fn had_new_results(&self) -> bool {
        !self.accepted.is_empty()
    }
}

pub struct Crawler {
    config: CrawlConfig,
    source: Source,
    history: HistoryStore,
}

impl Crawler {
    /// Validate the configuration and build the backend client.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        config.validate()?;
        let source = Source::from_config(&config)?;
        let history = HistoryStore::new(config.history_path());
        Ok(Self {
            config,
            source,
            history,
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Cursor rebuilt from the history file.
    pub fn resume_cursor(&self) -> Result<Cursor> {
        Cursor::resume(&self.history)
    }

    /// Run one full cycle from `cursor`.
    pub async fn run_cycle(&self, cursor: &Cursor) -> Result<CycleReport> {
        let page = self
            .source
            .fetch_page(&self.config.query, self.config.page_size, cursor)
            .await?;
        self.record_page(cursor, page)
    }

    /// Filter a fetched page against history, persist the new records and
    /// compute the next cursor.
    pub fn record_page(&self, cursor: &Cursor, page: Page) -> Result<CycleReport> {
        let fetched = page.records.len();
        let existing = self.history.load()?;
        let accepted = filter_new(page.records, &existing);

        self.history.append(&accepted)?;

        let had_new = !accepted.is_empty();
        let next = cursor.advance(self.config.page_size, had_new, page.next_token);

        info!(
            backend = %self.config.backend,
            fetched,
            accepted = accepted.len(),
            duplicates = fetched - accepted.len(),
            offset = cursor.offset,
            next_offset = next.offset,
            "Cycle complete"
        );

        Ok(CycleReport {
            fetched,
            accepted,
            cursor: next,
            complete: page.complete,
        })
    }
}
