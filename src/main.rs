//! rustpapercrawl - incremental paper crawler
//!
//! ## Usage
//!
//! ```bash
//! rustpapercrawl crawl --backend arxiv --query "all:acoustic AND all:sensing" --cycles 3
//! rustpapercrawl history --backend arxiv
//! rustpapercrawl cookies import ~/Downloads/scholar_cookies.json
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rustpapercrawl::cookies::CookieFile;
use rustpapercrawl::{Backend, CrawlConfig, Crawler, Cursor, HistoryStore};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Incremental, deduplicating paper crawler
#[derive(Parser)]
#[command(name = "rustpapercrawl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fetch cycles against one backend
    Crawl {
        /// Backend: arxiv, scholar or semantic_scholar
        #[arg(short, long)]
        backend: String,

        /// Query expression (arXiv syntax for arxiv, e.g. "all:acoustic AND all:sensing")
        #[arg(short, long)]
        query: String,

        /// Records requested per cycle
        #[arg(long, default_value_t = rustpapercrawl::config::DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Starting offset (default: number of records already in history)
        #[arg(long)]
        start: Option<usize>,

        /// Continuation token from a previous Semantic Scholar run
        #[arg(long)]
        token: Option<String>,

        /// Number of sequential cycles to run
        #[arg(long, default_value_t = 1)]
        cycles: usize,

        /// Directory for history files
        #[arg(short, long, default_value = rustpapercrawl::config::DEFAULT_OUTPUT_DIR)]
        output: PathBuf,

        /// Explicit history file
        #[arg(long)]
        history: Option<PathBuf>,

        /// arXiv: first submission date of the search window (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Pause between requests in seconds (arXiv never goes below 3, Semantic Scholar below 1)
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Scholar: results from this year onwards
        #[arg(long)]
        ylo: Option<i32>,

        /// Proxy URL (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Scholar mirror site URL
        #[arg(long)]
        mirror: Option<String>,

        /// Scholar cookie file
        #[arg(long)]
        cookies: Option<PathBuf>,
    },

    /// Show history size and the offset the next run resumes from
    History {
        /// Backend: arxiv, scholar or semantic_scholar
        #[arg(short, long)]
        backend: String,

        /// Directory for history files
        #[arg(short, long, default_value = rustpapercrawl::config::DEFAULT_OUTPUT_DIR)]
        output: PathBuf,

        /// Explicit history file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Manage Google Scholar cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show cookie file path
    Path,
    /// Clear stored cookies
    Clear,
    /// Import a JSON cookie export from the browser
    Import {
        /// Exported cookie file
        file: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Crawl {
            backend,
            query,
            page_size,
            start,
            token,
            cycles,
            output,
            history,
            since,
            delay_secs,
            ylo,
            proxy,
            mirror,
            cookies,
        } => {
            let backend: Backend = backend.parse()?;
            let mut config = CrawlConfig::new(backend, query);
            config.page_size = page_size;
            config.output_dir = output;
            config.history_path = history;

            if let Some(since) = since {
                config.arxiv.window_start = since;
            }
            if let Some(secs) = delay_secs {
                let delay = Duration::from_secs(secs);
                config.arxiv.delay = delay;
                config.scholar.delay = delay;
                config.semantic_scholar.delay = delay;
            }
            config.arxiv.proxy = proxy.clone();
            config.scholar.proxy = proxy.clone();
            config.semantic_scholar.proxy = proxy;
            config.scholar.ylo = ylo;
            config.scholar.base_url = mirror;
            config.scholar.cookie_path = cookies;

            run_crawl(config, start, token, cycles).await
        }
        Commands::History {
            backend,
            output,
            history,
        } => {
            let backend: Backend = backend.parse()?;
            let path = history.unwrap_or_else(|| output.join(backend.history_file_name()));
            show_history(&HistoryStore::new(path))
        }
        Commands::Cookies { action } => handle_cookies(action),
    }
}

// ============================================================================
// Crawl
// ============================================================================

async fn run_crawl(
    config: CrawlConfig,
    start: Option<usize>,
    token: Option<String>,
    cycles: usize,
) -> Result<()> {
    let crawler = Crawler::new(config).context("Invalid crawl configuration")?;

    let mut cursor = match start {
        Some(offset) => Cursor::new(offset),
        None => crawler
            .resume_cursor()
            .context("Failed to read history for resume offset")?,
    }
    .with_token(token);

    info!(
        backend = %crawler.config().backend,
        history = ?crawler.history().path(),
        offset = cursor.offset,
        "Starting search from index {}",
        cursor.offset
    );

    for cycle in 1..=cycles {
        let report = match crawler.run_cycle(&cursor).await {
            Ok(report) => report,
            Err(e) => {
                if e.is_transport() {
                    // Nothing was appended; the same window can be fetched again
                    warn!(cycle, error = %e, "Upstream request failed, offset not advanced");
                    println!("The next starting index for future searches is {}", cursor.offset);
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("Cycle {} failed at offset {}", cycle, cursor.offset)));
            }
        };

        println!(
            "Cycle {}: fetched {}, new {}, offset {} -> {}",
            cycle,
            report.fetched,
            report.accepted.len(),
            cursor.offset,
            report.cursor.offset
        );
        for record in &report.accepted {
            println!("  + {}", record.title);
        }

        let stop = report.complete || !report.had_new_results();
        cursor = report.cursor;

        if stop && cycle < cycles {
            warn!(cycle, "No new results, stopping early");
            break;
        }
    }

    if let Some(token) = &cursor.token {
        println!("Continuation token: {}", token);
    }
    println!("The next starting index for future searches is {}", cursor.offset);
    Ok(())
}

fn show_history(store: &HistoryStore) -> Result<()> {
    let count = store.count().context("Failed to read history")?;
    println!("History file: {}", store.path().display());
    println!("Records: {}", count);
    println!("Next run resumes at offset {}", count);
    Ok(())
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(action: CookieAction) -> Result<()> {
    let file = CookieFile::at_default_path();

    match action {
        CookieAction::Path => {
            println!("Cookie file: {}", file.path().display());
        }
        CookieAction::Clear => {
            file.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Import { file: export } => {
            let count = file
                .import(&export)
                .with_context(|| format!("Failed to import cookies from {}", export.display()))?;
            println!("Imported {} cookies into {}", count, file.path().display());
        }
    }

    Ok(())
}
