//! Error types for rustpapercrawl.
//!
//! Fetch- and persistence-level failures are surfaced to the caller through
//! [`CrawlError`]. Parse failures inside a page or a history file are logged and
//! the offending unit is skipped, so [`CrawlError::Parse`] only escapes when a
//! whole upstream response is unusable.

use thiserror::Error;

/// Main error type for crawl operations.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Network/HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from the upstream service
        message: String,
    },

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Google Scholar served a CAPTCHA page instead of results
    #[error("CAPTCHA detected, please refresh cookies")]
    Captcha,

    /// Missing or rejected credential
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Unknown backend selector or missing required parameter
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed upstream payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Filesystem error while reading or appending history
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrawlError {
    /// Whether the error happened on the way to or from the upstream service.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Api { .. } | Self::RateLimited(_) | Self::Captcha
        )
    }
}

/// Result type alias using `CrawlError`
pub type Result<T> = std::result::Result<T, CrawlError>;
