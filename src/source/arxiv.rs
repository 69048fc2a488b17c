//! arXiv API client.
//!
//! Queries the Atom export API over a submission-date window that runs from a
//! fixed start date to "now" (computed per call). Results are sorted by
//! submission date, oldest first, so newly submitted papers land at the end of
//! the ordering and an offset stays valid between runs.
//!
//! API Details:
//! - `start` / `max_results` page through the result list
//! - at most one request every 3 seconds

use super::{build_http_client, read_body, Page};
use crate::error::{CrawlError, Result};
use crate::record::{non_empty, squash_whitespace, Record};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// arXiv export API endpoint
pub const DEFAULT_ARXIV_URL: &str = "http://export.arxiv.org/api/query";

/// Minimum pause after each request, as asked by the arXiv API docs
pub const MIN_DELAY: Duration = Duration::from_secs(3);

/// Timestamp format used by `submittedDate` ranges
const DATE_FORMAT: &str = "%Y%m%d%H%M";

const USER_AGENT: &str = "rustpapercrawl/0.1 (arxiv)";

/// Options for the arXiv backend
#[derive(Debug, Clone)]
pub struct ArxivOptions {
    /// Custom API endpoint
    pub base_url: Option<String>,
    /// First day of the submission window
    pub window_start: NaiveDate,
    /// Pause after each request; clamped to [`MIN_DELAY`]
    pub delay: Duration,
    /// Proxy URL
    pub proxy: Option<String>,
}

impl Default for ArxivOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            window_start: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            delay: MIN_DELAY,
            proxy: None,
        }
    }
}

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
    window_start: NaiveDateTime,
    delay: Duration,
}

impl ArxivClient {
    pub fn new(options: &ArxivOptions) -> Result<Self> {
        let delay = if options.delay < MIN_DELAY {
            warn!(requested = ?options.delay, "arXiv delay below minimum, using {:?}", MIN_DELAY);
            MIN_DELAY
        } else {
            options.delay
        };

        Ok(Self {
            client: build_http_client(USER_AGENT, Duration::from_secs(60), options.proxy.as_deref())?,
            base_url: options
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ARXIV_URL.to_string()),
            window_start: options.window_start.and_hms_opt(0, 0, 0).unwrap_or_default(),
            delay,
        })
    }

    /// Fetch `page_size` entries starting at `start`.
    ///
    /// An empty response body is not an error: it comes back as an empty,
    /// incomplete page so the caller simply tries again later.
    pub async fn fetch_page(&self, query: &str, page_size: usize, start: usize) -> Result<Page> {
        let now = Utc::now().naive_utc();
        let url = build_query_url(&self.base_url, query, self.window_start, now, start, page_size)?;

        info!(query, start, end = start + page_size, "Searching arXiv");
        debug!(url = %url, "arXiv request");

        let result = self.request(&url).await;

        debug!(delay = ?self.delay, "Sleeping before next arXiv call");
        tokio::time::sleep(self.delay).await;

        let body = result?;
        if body.trim().is_empty() {
            info!(start, "arXiv returned an empty response, no new results this cycle");
            return Ok(Page::default());
        }

        let feed = parse_atom_feed(&body);
        let complete = feed.entries < page_size;

        info!(
            parsed = feed.records.len(),
            entries = feed.entries,
            total = ?feed.total_results,
            "Parsed arXiv feed"
        );

        Ok(Page {
            records: feed.records,
            next_token: None,
            complete,
        })
    }

    async fn request(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.as_str()).send().await?;
        read_body(response).await
    }
}

/// Build the query URL for one page.
fn build_query_url(
    base_url: &str,
    query: &str,
    window_start: NaiveDateTime,
    now: NaiveDateTime,
    start: usize,
    max_results: usize,
) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| CrawlError::Config(format!("Invalid arXiv URL: {}", e)))?;

    let search_query = format!(
        "{} AND submittedDate:[{} TO {}]",
        query.trim(),
        window_start.format(DATE_FORMAT),
        now.format(DATE_FORMAT)
    );

    url.query_pairs_mut()
        .append_pair("search_query", &search_query)
        .append_pair("start", &start.to_string())
        .append_pair("max_results", &max_results.to_string())
        .append_pair("sortBy", "submittedDate")
        .append_pair("sortOrder", "ascending");

    Ok(url)
}

/// Parsed Atom feed
#[derive(Debug, Default)]
struct Feed {
    records: Vec<Record>,
    /// `<entry>` elements seen, including the ones that were dropped
    entries: usize,
    /// `opensearch:totalResults`
    total_results: Option<usize>,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    author_name: String,
    in_author: bool,
}

impl EntryBuilder {
    fn build(self) -> Option<Record> {
        let url = self.id.trim().to_string();
        let arxiv_id = url.rsplit("/abs/").next().unwrap_or_default().to_string();
        let title = squash_whitespace(&self.title);
        if arxiv_id.is_empty() || title.is_empty() {
            return None;
        }

        Some(Record {
            title,
            authors: self.authors,
            id: arxiv_id,
            url,
            summary: non_empty(squash_whitespace(&self.summary)),
            year: self.published.trim().get(..4).and_then(|y| y.parse().ok()),
            venue: None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    TotalResults,
}

/// Parse an arXiv Atom feed.
///
/// Entries without an id or title are dropped. If the XML breaks part way
/// through, the entries read up to that point are kept.
fn parse_atom_feed(xml: &str) -> Feed {
    let mut reader = Reader::from_str(xml);
    let mut feed = Feed::default();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;
    let mut total_text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"entry" {
                    entry = Some(EntryBuilder::default());
                    field = None;
                } else {
                    field = match (name.as_ref(), entry.as_mut()) {
                        (b"author", Some(b)) => {
                            b.in_author = true;
                            b.author_name.clear();
                            None
                        }
                        (b"name", Some(b)) if b.in_author => Some(Field::AuthorName),
                        (b"id", Some(_)) => Some(Field::Id),
                        (b"title", Some(_)) => Some(Field::Title),
                        (b"summary", Some(_)) => Some(Field::Summary),
                        (b"published", Some(_)) => Some(Field::Published),
                        (b"totalResults", None) => Some(Field::TotalResults),
                        _ => None,
                    };
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = field {
                    match t.unescape() {
                        Ok(text) => {
                            let target = match (current, entry.as_mut()) {
                                (Field::TotalResults, _) => Some(&mut total_text),
                                (Field::Id, Some(b)) => Some(&mut b.id),
                                (Field::Title, Some(b)) => Some(&mut b.title),
                                (Field::Summary, Some(b)) => Some(&mut b.summary),
                                (Field::Published, Some(b)) => Some(&mut b.published),
                                (Field::AuthorName, Some(b)) => Some(&mut b.author_name),
                                _ => None,
                            };
                            if let Some(target) = target {
                                target.push_str(&text);
                            }
                        }
                        Err(e) => debug!(error = %e, "Undecodable text in arXiv feed"),
                    }
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(builder) = entry.take() {
                            feed.entries += 1;
                            match builder.build() {
                                Some(record) => feed.records.push(record),
                                None => debug!("Skipping arXiv entry without id or title"),
                            }
                        }
                    }
                    b"author" => {
                        if let Some(b) = entry.as_mut() {
                            b.in_author = false;
                            let name = b.author_name.trim().to_string();
                            if !name.is_empty() {
                                b.authors.push(name);
                            }
                        }
                    }
                    b"totalResults" => {
                        feed.total_results = total_text.trim().parse().ok();
                    }
                    _ => {}
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(
                    position = reader.buffer_position(),
                    error = %e,
                    kept = feed.records.len(),
                    "Malformed arXiv feed, keeping entries parsed so far"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::stub::{closed_url, StubServer};
    use std::time::Instant;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <title type="html">ArXiv Query: search_query=all:acoustic</title>
  <opensearch:totalResults>42</opensearch:totalResults>
  <opensearch:startIndex>0</opensearch:startIndex>
  <entry>
    <id>http://arxiv.org/abs/2301.12345v1</id>
    <published>2023-01-15T00:00:00Z</published>
    <title>Distributed Acoustic Sensing
      for Seismology</title>
    <summary>  Fiber-optic cables &amp; seismic arrays.
    </summary>
    <author><name>John Doe</name></author>
    <author><name>Jane Smith</name></author>
    <link href="http://arxiv.org/abs/2301.12345v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2302.00001v2</id>
    <published>2023-02-01T00:00:00Z</published>
    <title>No authors here</title>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2303.00002v1</id>
    <summary>Missing title</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_feed() {
        let feed = parse_atom_feed(SAMPLE_FEED);
        assert_eq!(feed.entries, 3);
        assert_eq!(feed.total_results, Some(42));
        assert_eq!(feed.records.len(), 2);

        let first = &feed.records[0];
        assert_eq!(first.id, "2301.12345v1");
        assert_eq!(first.url, "http://arxiv.org/abs/2301.12345v1");
        assert_eq!(first.title, "Distributed Acoustic Sensing for Seismology");
        assert_eq!(first.authors, vec!["John Doe", "Jane Smith"]);
        assert_eq!(first.summary.as_deref(), Some("Fiber-optic cables & seismic arrays."));
        assert_eq!(first.year, Some(2023));
    }

    #[test]
    fn test_entry_without_author_is_kept() {
        let feed = parse_atom_feed(SAMPLE_FEED);
        let second = &feed.records[1];
        assert_eq!(second.title, "No authors here");
        assert!(second.authors.is_empty());
        assert!(second.summary.is_none());
    }

    #[test]
    fn test_truncated_feed_keeps_parsed_entries() {
        let cut = SAMPLE_FEED
            .find("<entry>\n    <id>http://arxiv.org/abs/2302")
            .map(|i| &SAMPLE_FEED[..i + 40])
            .unwrap_or(SAMPLE_FEED);
        let feed = parse_atom_feed(&format!("{}</wrong>", cut));
        assert_eq!(feed.records.len(), 1);
        assert_eq!(feed.records[0].id, "2301.12345v1");
    }

    #[test]
    fn test_empty_feed() {
        let feed = parse_atom_feed(r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#);
        assert!(feed.records.is_empty());
        assert_eq!(feed.entries, 0);
    }

    #[test]
    fn test_build_query_url() -> Result<()> {
        let start = NaiveDate::from_ymd_opt(2010, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| CrawlError::Config("bad date".to_string()))?;
        let now = NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .ok_or_else(|| CrawlError::Config("bad date".to_string()))?;

        let url = build_query_url(DEFAULT_ARXIV_URL, "all:acoustic AND all:sensing", start, now, 20, 10)?;
        let pairs: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(
            pairs.get("search_query").map(String::as_str),
            Some("all:acoustic AND all:sensing AND submittedDate:[201001010000 TO 202610191230]")
        );
        assert_eq!(pairs.get("start").map(String::as_str), Some("20"));
        assert_eq!(pairs.get("max_results").map(String::as_str), Some("10"));
        assert_eq!(pairs.get("sortBy").map(String::as_str), Some("submittedDate"));
        Ok(())
    }

    fn stub_client(base_url: String) -> Result<ArxivClient> {
        ArxivClient::new(&ArxivOptions {
            base_url: Some(base_url),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_page() -> Result<()> {
        let server = StubServer::start(200, "").await?;
        let client = stub_client(format!("{}/api/query", server.url))?;

        let page = client.fetch_page("all:acoustic", 10, 0).await?;
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
        assert!(!page.complete);
        assert_eq!(server.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_short_page_is_complete() -> Result<()> {
        let server = StubServer::start(200, SAMPLE_FEED).await?;
        let client = stub_client(server.url.clone())?;

        let page = client.fetch_page("all:acoustic", 10, 40).await?;
        assert_eq!(page.records.len(), 2);
        assert!(page.complete);

        let full = client.fetch_page("all:acoustic", 3, 0).await?;
        assert!(!full.complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_delay_applies_to_failed_requests() -> Result<()> {
        let server = StubServer::start(503, "Service Unavailable").await?;
        let client = stub_client(server.url.clone())?;

        let started = Instant::now();
        let err = client.fetch_page("all:acoustic", 10, 0).await.err();

        assert!(matches!(err, Some(CrawlError::Api { code: 503, .. })));
        assert!(started.elapsed() >= MIN_DELAY);
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_error_propagates() -> Result<()> {
        let client = stub_client(closed_url().await?)?;

        let started = Instant::now();
        let err = client.fetch_page("all:acoustic", 10, 0).await.err();

        assert!(matches!(err, Some(CrawlError::Transport(_))));
        assert!(err.is_some_and(|e| e.is_transport()));
        assert!(started.elapsed() >= MIN_DELAY);
        Ok(())
    }

    #[test]
    fn test_delay_is_clamped() -> Result<()> {
        let client = ArxivClient::new(&ArxivOptions {
            delay: Duration::from_millis(10),
            ..Default::default()
        })?;
        assert_eq!(client.delay, MIN_DELAY);
        Ok(())
    }
}
