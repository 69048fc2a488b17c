//! # rustpapercrawl
//!
//! Incremental, deduplicating paper crawler.
//!
//! Each cycle fetches one page from a paper-search backend, drops the records
//! already in that backend's history file, appends the rest, and moves the
//! offset forward only if something new was found.
//!
//! ## Modules
//!
//! - [`source`] - arXiv, Google Scholar and Semantic Scholar adapters
//! - [`history`] - append-only JSON-lines history and dedupe
//! - [`paginator`] - offset / continuation-token cursor
//! - [`crawler`] - one fetch → filter → append → advance cycle
//! - [`config`] - explicit crawl configuration
//! - [`cookies`] - browser cookies for Google Scholar
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustpapercrawl::{Backend, CrawlConfig, Crawler};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CrawlConfig::new(Backend::Arxiv, "all:acoustic AND all:sensing");
//!     let crawler = Crawler::new(config)?;
//!     let cursor = crawler.resume_cursor()?;
//!     let report = crawler.run_cycle(&cursor).await?;
//!     println!("{} new, next offset {}", report.accepted.len(), report.cursor.offset);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod crawler;
pub mod error;
pub mod history;
pub mod paginator;
pub mod record;
pub mod source;

pub use config::CrawlConfig;
pub use crawler::{CycleReport, Crawler};
pub use error::{CrawlError, Result};
pub use history::HistoryStore;
pub use paginator::{next_offset, Cursor};
pub use record::Record;
pub use source::{Backend, Page, Source};
