//! Google Scholar scraping.
//!
//! Scholar has no API. Results are read from the HTML result pages (10 items
//! each) through a lazy stream: pages are only requested when the consumer
//! needs more items, and a page with no items ends the stream. Running out of
//! results is a normal end of the batch, not an error.

use super::{build_http_client, read_body, Page};
use crate::cookies::CookieFile;
use crate::error::{CrawlError, Result};
use crate::record::{non_empty, Record};
use futures::{stream, Stream, TryStreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Results per Scholar result page
pub const RESULTS_PER_PAGE: usize = 10;

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Options for the Google Scholar backend
#[derive(Debug, Clone)]
pub struct ScholarOptions {
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Custom base URL for mirror sites
    pub base_url: Option<String>,
    /// Source data type filter (default: "0,5" for articles only)
    pub sdt: String,
    /// Year low filter (results from this year onwards)
    pub ylo: Option<i32>,
    /// Pause before each results-page request
    pub delay: Duration,
    /// Cookie file; `None` uses the default location
    pub cookie_path: Option<PathBuf>,
}

impl Default for ScholarOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            base_url: None,
            sdt: "0,5".to_string(),
            ylo: None,
            delay: Duration::from_secs(1),
            cookie_path: None,
        }
    }
}

pub struct ScholarClient {
    client: reqwest::Client,
    base_url: String,
    sdt: String,
    ylo: Option<i32>,
    delay: Duration,
    cookies: CookieFile,
}

impl ScholarClient {
    pub fn new(options: &ScholarOptions) -> Result<Self> {
        let base_url = options
            .base_url
            .as_ref()
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_SCHOLAR_URL.to_string());
        let cookies = options
            .cookie_path
            .clone()
            .map(CookieFile::new)
            .unwrap_or_else(CookieFile::at_default_path);

        Ok(Self {
            client: build_http_client(USER_AGENT, Duration::from_secs(30), options.proxy.as_deref())?,
            base_url,
            sdt: options.sdt.clone(),
            ylo: options.ylo,
            delay: options.delay,
            cookies,
        })
    }

    /// Pull up to `page_size` results starting at `start_offset`.
    ///
    /// `complete` is set when the results ran out before the batch filled up.
    pub async fn fetch_page(&self, query: &str, page_size: usize, start_offset: usize) -> Result<Page> {
        info!(query, start = start_offset, page_size, url = %self.base_url, "Searching Google Scholar");

        let (records, complete) = take_batch(self.results(query, start_offset), page_size).await?;

        info!(count = records.len(), exhausted = complete, "Google Scholar batch collected");
        Ok(Page {
            records,
            next_token: None,
            complete,
        })
    }

    /// Lazy stream of results from `start_offset` onwards.
    pub fn results<'a>(
        &'a self,
        query: &'a str,
        start_offset: usize,
    ) -> impl Stream<Item = Result<Record>> + 'a {
        let (page_start, skip) = page_window(start_offset);

        let pages = stream::try_unfold((Some(page_start), skip), move |(next, skip)| async move {
            let Some(start) = next else {
                return Ok::<_, CrawlError>(None);
            };
            let mut items = self.fetch_results_page(query, start).await?;
            let next = if items.is_empty() {
                None
            } else {
                Some(start + RESULTS_PER_PAGE)
            };
            items.drain(..skip.min(items.len()));
            Ok::<_, CrawlError>(Some((items, (next, 0))))
        });

        pages
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<Record, CrawlError>)))
            .try_flatten()
    }

    /// Fetch and parse the results page that begins at `start`.
    async fn fetch_results_page(&self, query: &str, start: usize) -> Result<Vec<Record>> {
        let url = build_search_url(&self.base_url, query, start, &self.sdt, self.ylo)?;
        debug!(start, url = %url, "Fetching page");

        tokio::time::sleep(self.delay).await;

        let html = self.fetch_html(&url).await?;
        if html.contains("Solving the above CAPTCHA") || html.contains("unusual traffic") {
            warn!(start, "CAPTCHA detected");
            return Err(CrawlError::Captcha);
        }

        let items = parse_result_items(&html)?;
        info!(start, count = items.len(), "Parsed results");
        Ok(items)
    }

    async fn fetch_html(&self, url: &Url) -> Result<String> {
        let mut request = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Upgrade-Insecure-Requests", "1");

        let cookie_header = self.cookies.header_for("google");
        if cookie_header.is_empty() {
            warn!("No cookies loaded; Scholar may answer with a CAPTCHA. Import some with 'rustpapercrawl cookies import'.");
        } else {
            request = request.header("Cookie", cookie_header);
        }

        read_body(request.send().await?).await
    }
}

/// Split an offset into the Scholar page start and the items to skip on it.
fn page_window(offset: usize) -> (usize, usize) {
    let page_start = offset - offset % RESULTS_PER_PAGE;
    (page_start, offset - page_start)
}

/// Pull up to `page_size` items from `results`.
///
/// Returns the batch and whether the stream ran dry before it filled up.
async fn take_batch<S>(results: S, page_size: usize) -> Result<(Vec<Record>, bool)>
where
    S: Stream<Item = Result<Record>>,
{
    let mut results = std::pin::pin!(results);
    let mut batch = Vec::with_capacity(page_size);

    while batch.len() < page_size {
        match results.try_next().await? {
            Some(record) => batch.push(record),
            None => return Ok((batch, true)),
        }
    }
    Ok((batch, false))
}

/// Build Google Scholar search URL
fn build_search_url(
    base_url: &str,
    query: &str,
    start: usize,
    sdt: &str,
    ylo: Option<i32>,
) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| CrawlError::Config(format!("Invalid base URL: {}", e)))?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("q", query);
        params.append_pair("hl", "en-US"); // English locale keeps the markup stable
        params.append_pair("start", &start.to_string());
        params.append_pair("as_sdt", sdt);
        if let Some(year) = ylo {
            params.append_pair("as_ylo", &year.to_string());
        }
    }

    Ok(url)
}

/// Parse a Google Scholar results page into records.
///
/// Items without a title are skipped. Missing author, venue or snippet blocks
/// leave the matching fields empty.
fn parse_result_items(html: &str) -> Result<Vec<Record>> {
    let document = Html::parse_document(html);

    let item_selector =
        Selector::parse("div.gs_r.gs_or.gs_scl").map_err(|e| CrawlError::Parse(e.to_string()))?;
    let title_selector =
        Selector::parse("h3.gs_rt").map_err(|e| CrawlError::Parse(e.to_string()))?;
    let link_selector =
        Selector::parse("h3.gs_rt a").map_err(|e| CrawlError::Parse(e.to_string()))?;
    let meta_selector =
        Selector::parse("div.gs_a").map_err(|e| CrawlError::Parse(e.to_string()))?;
    let snippet_selector =
        Selector::parse("div.gs_rs").map_err(|e| CrawlError::Parse(e.to_string()))?;

    let year_regex = Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| CrawlError::Parse(e.to_string()))?;

    let mut records = Vec::new();

    for item in document.select(&item_selector) {
        let mut record = Record::default();

        if let Some(link) = item.select(&link_selector).next() {
            record.title = link.text().collect::<String>().trim().to_string();
            record.url = link.value().attr("href").unwrap_or_default().to_string();
        } else if let Some(title_elem) = item.select(&title_selector).next() {
            // [CITATION] / [BOOK] entries have no link
            record.title = title_elem.text().collect::<String>().trim().to_string();
        }

        if record.title.is_empty() {
            debug!("Skipping Scholar item without title");
            continue;
        }

        record.id = item.value().attr("data-cid").unwrap_or_default().to_string();

        // "A Author, B Author - Venue, 2021 - publisher"
        if let Some(meta_elem) = item.select(&meta_selector).next() {
            let meta_text = meta_elem.text().collect::<String>();
            let mut parts = meta_text.split(" - ");

            if let Some(author) = parts.next().map(str::trim).filter(|a| !a.is_empty()) {
                record.authors = vec![author.to_string()];
            }

            if let Some(venue_year) = parts.next() {
                match year_regex.find(venue_year) {
                    Some(year) => {
                        record.year = year.as_str().parse().ok();
                        let venue = venue_year[..year.start()].trim().trim_end_matches(',');
                        record.venue = non_empty(venue.trim().to_string());
                    }
                    None => record.venue = non_empty(venue_year.trim().to_string()),
                }
            }
        }

        if let Some(snippet_elem) = item.select(&snippet_selector).next() {
            record.summary = non_empty(snippet_elem.text().collect::<String>().trim().to_string());
        }

        records.push(record);
    }

    Ok(records)
}
