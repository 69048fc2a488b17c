//! Browser cookies for Google Scholar requests.
//!
//! Scholar quickly starts answering cookie-less clients with CAPTCHA pages.
//! Cookies exported from a browser session are kept in a JSON file and sent
//! along with every results-page request.

use crate::error::{CrawlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cookie file path: `~/.rustpapercrawl_cookies.json`
pub fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".rustpapercrawl_cookies.json"))
        .ok_or_else(|| CrawlError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in the browser export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
}

/// Cookie file on disk
#[derive(Debug, Clone)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cookie file at the default location, or `.rustpapercrawl_cookies.json`
    /// in the working directory when there is no home directory.
    pub fn at_default_path() -> Self {
        Self::new(
            default_cookie_path().unwrap_or_else(|_| PathBuf::from(".rustpapercrawl_cookies.json")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies.
    ///
    /// Returns an empty list if the file doesn't exist or is invalid; Scholar
    /// is still queried, it just gets blocked sooner.
    pub fn load(&self) -> Vec<Cookie> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "Cookie file not found");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read cookie file");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Cookie>>(&content) {
            Ok(cookies) => {
                info!(path = ?self.path, count = cookies.len(), "Loaded cookies");
                cookies
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to parse cookies");
                Vec::new()
            }
        }
    }

    /// `Cookie` header value for requests to `domain`.
    pub fn header_for(&self, domain: &str) -> String {
        cookie_header(&self.load(), domain)
    }

    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!(path = ?self.path, count = cookies.len(), "Saved cookies");
        Ok(())
    }

    /// Replace the stored cookies with the ones in a browser export file.
    pub fn import(&self, export: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(export)?;
        let cookies: Vec<Cookie> = serde_json::from_str(&content)?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = ?self.path, "Cleared cookies");
        }
        Ok(())
    }
}

fn cookie_header(cookies: &[Cookie], domain: &str) -> String {
    cookies
        .iter()
        .filter(|c| c.domain.contains(domain))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cookie(name: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: "value".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires: None,
        }
    }

    #[test]
    fn test_load_missing() {
        let file = CookieFile::new("/nonexistent/path/cookies.json");
        assert!(file.load().is_empty());
        assert!(file.header_for("google").is_empty());
    }

    #[test]
    fn test_save_load_and_header() -> Result<()> {
        let dir = TempDir::new()?;
        let file = CookieFile::new(dir.path().join("cookies.json"));

        file.save(&[cookie("NID", ".google.com"), cookie("other", ".example.com"), cookie("GSP", "scholar.google.com")])?;
        assert_eq!(file.load().len(), 3);
        assert_eq!(file.header_for("google"), "NID=value; GSP=value");
        Ok(())
    }

    #[test]
    fn test_import_browser_export() -> Result<()> {
        let dir = TempDir::new()?;
        let export = dir.path().join("export.json");
        std::fs::write(
            &export,
            r#"[{"name":"NID","value":"abc","domain":".google.com","httpOnly":true,"expirationDate":1800000000.5}]"#,
        )?;

        let file = CookieFile::new(dir.path().join("cookies.json"));
        assert_eq!(file.import(&export)?, 1);
        let loaded = file.load();
        assert!(loaded[0].http_only);

        file.clear()?;
        assert!(!file.path().exists());
        Ok(())
    }
}
