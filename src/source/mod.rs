//! Upstream paper-search backends.
//!
//! Three backends sit behind one [`Source::fetch_page`] entry point:
//!
//! - [`arxiv`] - offset-paginated Atom feed over a submission-date window
//! - [`scholar`] - scraped Google Scholar result pages, read as a lazy stream
//! - [`semantic_scholar`] - token-paginated bulk search (needs an API key)
//!
//! Every backend normalizes its entries into [`Record`]s. Malformed entries are
//! dropped one at a time; transport failures are returned as-is.

pub mod arxiv;
pub mod scholar;
pub mod semantic_scholar;

use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::paginator::Cursor;
use crate::record::Record;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Backend selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    Arxiv,
    Scholar,
    SemanticScholar,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Self::Arxiv, Self::Scholar, Self::SemanticScholar];

    /// Parse a selector string, accepting a few common aliases.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Some(Self::Arxiv),
            "scholar" | "gscholar" | "google_scholar" => Some(Self::Scholar),
            "semantic_scholar" | "semanticscholar" | "s2" => Some(Self::SemanticScholar),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Scholar => "scholar",
            Self::SemanticScholar => "semantic_scholar",
        }
    }

    /// Default history file; one per backend so dedupe never crosses backends.
    pub fn history_file_name(self) -> String {
        format!("{}_records.jsonl", self.name())
    }
}

impl FromStr for Backend {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| {
            let expected: Vec<&str> = Self::ALL.iter().map(|b| b.name()).collect();
            CrawlError::Config(format!(
                "Unknown backend '{}' (expected one of: {})",
                s,
                expected.join(", ")
            ))
        })
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One fetched page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    /// Token to pass into the next call (token-paginated backends only).
    pub next_token: Option<String>,
    /// The upstream has nothing beyond this page right now.
    pub complete: bool,
}

/// A constructed backend client.
pub enum Source {
    Arxiv(arxiv::ArxivClient),
    Scholar(scholar::ScholarClient),
    SemanticScholar(semantic_scholar::SemanticScholarClient),
}

impl Source {
    /// Build the client for the configured backend.
    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        let source = match config.backend {
            Backend::Arxiv => Self::Arxiv(arxiv::ArxivClient::new(&config.arxiv)?),
            Backend::Scholar => Self::Scholar(scholar::ScholarClient::new(&config.scholar)?),
            Backend::SemanticScholar => Self::SemanticScholar(
                semantic_scholar::SemanticScholarClient::new(&config.semantic_scholar)?,
            ),
        };
        Ok(source)
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Arxiv(_) => Backend::Arxiv,
            Self::Scholar(_) => Backend::Scholar,
            Self::SemanticScholar(_) => Backend::SemanticScholar,
        }
    }

    /// Fetch one page of records starting at `cursor`.
    ///
    /// # Errors
    ///
    /// - `CrawlError::Config` if `page_size` is zero or `query` is blank
    /// - `CrawlError::Authentication` if Semantic Scholar has no API key
    /// - transport-level variants on network or HTTP failure
    pub async fn fetch_page(&self, query: &str, page_size: usize, cursor: &Cursor) -> Result<Page> {
        if page_size == 0 {
            return Err(CrawlError::Config("page size must be positive".to_string()));
        }
        if query.trim().is_empty() {
            return Err(CrawlError::Config("query must not be empty".to_string()));
        }

        debug!(
            backend = %self.backend(),
            offset = cursor.offset,
            page_size,
            token = ?cursor.token,
            "Fetching page"
        );

        match self {
            Self::Arxiv(client) => client.fetch_page(query, page_size, cursor.offset).await,
            Self::Scholar(client) => client.fetch_page(query, page_size, cursor.offset).await,
            Self::SemanticScholar(client) => {
                client
                    .fetch_page(query, page_size, cursor.offset, cursor.token.as_deref())
                    .await
            }
        }
    }
}

/// Build an HTTP client with optional proxy
pub(crate) fn build_http_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .cookie_store(true);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            CrawlError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| CrawlError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Read a response body, mapping non-success statuses to errors.
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(60);
        return Err(CrawlError::RateLimited(retry_after));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CrawlError::Api {
            code: status.as_u16(),
            message: format!("HTTP error: {} {}", status, body.trim()),
        });
    }

    Ok(response.text().await?)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_name() {
        assert_eq!(Backend::from_name("arxiv"), Some(Backend::Arxiv));
        assert_eq!(Backend::from_name("GScholar"), Some(Backend::Scholar));
        assert_eq!(Backend::from_name(" s2 "), Some(Backend::SemanticScholar));
        assert_eq!(Backend::from_name("pubmed"), None);
        assert_eq!(Backend::from_name(""), None);
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let err = "openalex".parse::<Backend>().err();
        assert!(matches!(&err, Some(CrawlError::Config(msg)) if msg.contains("semantic_scholar")));
    }

    #[test]
    fn test_history_files_are_distinct() {
        let names: std::collections::HashSet<String> =
            Backend::ALL.iter().map(|b| b.history_file_name()).collect();
        assert_eq!(names.len(), Backend::ALL.len());
        assert_eq!(Backend::Arxiv.history_file_name(), "arxiv_records.jsonl");
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() -> Result<()> {
        let config = CrawlConfig::new(Backend::Arxiv, "all:acoustic");
        let source = Source::from_config(&config)?;
        let err = source.fetch_page("all:acoustic", 0, &Cursor::default()).await.err();
        assert!(matches!(err, Some(CrawlError::Config(_))));
        Ok(())
    }
}
