//! Semantic Scholar bulk search client.
//!
//! API Details:
//! - Endpoint: GET /graph/v1/paper/search/bulk
//! - Up to 1000 papers per response, continued with an opaque `token`
//! - No offset or page-size parameter; pages are sliced client side
//! - Requires an API key (`x-api-key` header) for sustained crawling

use super::{build_http_client, read_body, Page};
use crate::error::{CrawlError, Result};
use crate::record::{non_empty, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Semantic Scholar API base URL
pub const SS_API_BASE: &str = "https://api.semanticscholar.org/graph/v1";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "SEMANTIC_SCHOLAR_API_KEY";

/// Minimum pause after each request
pub const MIN_DELAY: Duration = Duration::from_secs(1);

const FIELDS: &str = "title,authors,abstract,year,venue,url,externalIds";

const USER_AGENT: &str = "rustpapercrawl/0.1 (semantic-scholar)";

/// Options for the Semantic Scholar backend
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// API key; checked when a page is fetched, not when the client is built
    pub api_key: Option<String>,
    /// Custom API base URL
    pub base_url: Option<String>,
    /// Pause after each request; clamped to [`MIN_DELAY`]
    pub delay: Duration,
    /// Proxy URL
    pub proxy: Option<String>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            delay: MIN_DELAY,
            proxy: None,
        }
    }
}

impl BulkOptions {
    /// Defaults with the API key taken from [`API_KEY_ENV`].
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok(),
            ..Default::default()
        }
    }
}

/// Bulk search response. Entries stay raw so one bad entry can be skipped
/// without losing the page.
#[derive(Debug, Clone, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    authors: Option<Vec<S2Author>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<u32>,
    venue: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

impl S2Paper {
    fn into_record(self) -> Option<Record> {
        let title = self.title.map(|t| t.trim().to_string()).unwrap_or_default();
        if title.is_empty() {
            return None;
        }

        Some(Record {
            title,
            authors: self
                .authors
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| a.name)
                .collect(),
            id: self.paper_id.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            summary: self.abstract_text.and_then(non_empty),
            year: self.year,
            venue: self.venue.and_then(non_empty),
        })
    }
}

/// Convert raw bulk entries, skipping the ones that don't parse.
fn parse_entries(entries: Vec<Value>) -> Vec<Record> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| match serde_json::from_value::<S2Paper>(entry) {
            Ok(paper) => {
                let record = paper.into_record();
                if record.is_none() {
                    debug!(index = idx, "Skipping Semantic Scholar entry without title");
                }
                record
            }
            Err(e) => {
                warn!(index = idx, error = %e, "Malformed Semantic Scholar entry, skipping");
                None
            }
        })
        .collect()
}

/// Where the next record sits in the bulk result list: the token that
/// fetches the bulk page holding it (`None` for the first page) and how many
/// of that page's entries were already handed out.
///
/// Handed to callers as an opaque JSON string in `Page::next_token`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Continuation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page: Option<String>,
    #[serde(default)]
    skip: usize,
}

impl Continuation {
    /// Read a caller-supplied token. A bare upstream token resumes at the
    /// start of the page it names.
    fn decode(token: &str) -> Self {
        serde_json::from_str(token).unwrap_or_else(|_| Self {
            page: Some(token.to_string()),
            skip: 0,
        })
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Last bulk page fetched, kept so consecutive slices of it cost no request.
struct Buffered {
    query: String,
    page: Option<String>,
    response: BulkResponse,
}

pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    delay: Duration,
    buffer: Mutex<Option<Buffered>>,
}

impl SemanticScholarClient {
    pub fn new(options: &BulkOptions) -> Result<Self> {
        Ok(Self {
            client: build_http_client(USER_AGENT, Duration::from_secs(60), options.proxy.as_deref())?,
            base_url: options
                .base_url
                .as_ref()
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| SS_API_BASE.to_string()),
            api_key: options.api_key.clone().filter(|k| !k.trim().is_empty()),
            delay: options.delay.max(MIN_DELAY),
            buffer: Mutex::new(None),
        })
    }

    /// Fetch up to `page_size` records.
    ///
    /// With a `token`, the offset is ignored and the records after the token
    /// are returned. Without one, `start_offset` leading results are skipped,
    /// following upstream tokens as needed. A bulk page holds up to 1000
    /// entries; it is handed out `page_size` at a time and the returned token
    /// points inside it until it is used up.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Authentication` before any request if no API key is
    /// configured, or if the API rejects the key.
    pub async fn fetch_page(
        &self,
        query: &str,
        page_size: usize,
        start_offset: usize,
        token: Option<&str>,
    ) -> Result<Page> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            CrawlError::Authentication(format!(
                "Semantic Scholar API key missing; set {}",
                API_KEY_ENV
            ))
        })?;

        let Continuation {
            page: mut page_token,
            skip: mut to_skip,
        } = match token {
            Some(token) => {
                let resume = Continuation::decode(token);
                info!(query, skip = resume.skip, "Continuing Semantic Scholar bulk search from token");
                resume
            }
            None => {
                info!(query, start = start_offset, "Starting Semantic Scholar bulk search");
                Continuation {
                    page: None,
                    skip: start_offset,
                }
            }
        };

        loop {
            let response = self.bulk_page(query, page_token.as_deref(), api_key).await?;
            let returned = response.data.len();

            if to_skip < returned || returned == 0 || response.token.is_none() {
                return slice_page(response, page_token, to_skip, page_size);
            }

            debug!(skipped = returned, remaining = to_skip - returned, "Skipping past offset");
            to_skip -= returned;
            page_token = response.token;
        }
    }

    /// The bulk page for `page_token`, reusing the buffered one when it matches.
    async fn bulk_page(&self, query: &str, page_token: Option<&str>, api_key: &str) -> Result<BulkResponse> {
        let mut buffer = self.buffer.lock().await;
        if let Some(buffered) = buffer.as_ref() {
            if buffered.query == query && buffered.page.as_deref() == page_token {
                debug!("Serving Semantic Scholar page from buffer");
                return Ok(buffered.response.clone());
            }
        }

        let response = self.fetch_bulk(query, page_token, api_key).await?;
        // An empty page may be a transient upstream hiccup; ask again next time
        *buffer = (!response.data.is_empty()).then(|| Buffered {
            query: query.to_string(),
            page: page_token.map(str::to_string),
            response: response.clone(),
        });
        Ok(response)
    }

    async fn fetch_bulk(&self, query: &str, token: Option<&str>, api_key: &str) -> Result<BulkResponse> {
        let url = build_bulk_url(&self.base_url, query, token)?;
        debug!(url = %url, "Sending bulk request");

        let result = self.request(&url, api_key).await;

        debug!(delay = ?self.delay, "Sleeping after Semantic Scholar call");
        tokio::time::sleep(self.delay).await;

        Ok(parse_bulk_response(&result?))
    }

    async fn request(&self, url: &Url, api_key: &str) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .header("x-api-key", api_key)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CrawlError::Authentication(format!(
                "Semantic Scholar rejected the API key ({})",
                status
            )));
        }
        read_body(response).await
    }
}

fn build_bulk_url(base_url: &str, query: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/paper/search/bulk", base_url))
        .map_err(|e| CrawlError::Config(format!("Invalid Semantic Scholar URL: {}", e)))?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("query", query);
        params.append_pair("fields", FIELDS);
        if let Some(token) = token {
            params.append_pair("token", token);
        }
    }

    Ok(url)
}

/// Parse a bulk response body. An unusable body counts as an empty page.
fn parse_bulk_response(body: &str) -> BulkResponse {
    match serde_json::from_str::<BulkResponse>(body) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Unparseable Semantic Scholar response, treating as empty page");
            BulkResponse {
                total: None,
                token: None,
                data: Vec::new(),
            }
        }
    }
}

/// Hand out `page_size` raw entries of a bulk page, starting at `skip`.
///
/// `page_token` is the token that fetched `response`. While entries remain on
/// this page the next token points back into it; after the last one it
/// points at the upstream's next page.
fn slice_page(
    response: BulkResponse,
    page_token: Option<String>,
    skip: usize,
    page_size: usize,
) -> Result<Page> {
    let BulkResponse { total, token, data } = response;
    let returned = data.len();
    let end = skip.saturating_add(page_size).min(returned);
    let start = skip.min(end);

    let records = parse_entries(data.into_iter().skip(start).take(end - start).collect());

    let (next, complete) = if end < returned {
        let next = Continuation {
            page: page_token,
            skip: end,
        };
        (Some(next), false)
    } else {
        let complete = token.is_none();
        (token.map(|t| Continuation { page: Some(t), skip: 0 }), complete)
    };

    info!(
        count = records.len(),
        total = ?total,
        position = end,
        page_entries = returned,
        complete,
        "Semantic Scholar page parsed"
    );

    Ok(Page {
        records,
        next_token: next.map(|c| c.encode()).transpose()?,
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::paginator::Cursor;
    use crate::source::stub::StubServer;
    use crate::source::{Backend, Source};
    use std::time::Instant;

    const SAMPLE_RESPONSE: &str = r#"{
        "total": 3021,
        "token": "NEXT_PAGE_TOKEN",
        "data": [
            {
                "paperId": "649def34f8be52c8b66281af98ae884c09aef38b",
                "title": "Distributed Acoustic Sensing in Geophysics",
                "authors": [{"authorId": "1", "name": "A. Lindsey"}, {"authorId": "2", "name": null}],
                "abstract": "Review of DAS.",
                "year": 2020,
                "venue": "Annual Review",
                "url": "https://www.semanticscholar.org/paper/649def34"
            },
            {
                "paperId": "abc",
                "title": "Missing authors and abstract",
                "abstract": null,
                "year": null,
                "venue": ""
            },
            {
                "paperId": "bad",
                "title": "Year is a string",
                "year": "twenty twenty"
            },
            {
                "paperId": "untitled"
            }
        ]
    }"#;

    #[test]
    fn test_parse_bulk_response() -> Result<()> {
        let response = parse_bulk_response(SAMPLE_RESPONSE);
        assert_eq!(response.total, Some(3021));
        assert_eq!(response.data.len(), 4);

        let page = slice_page(response, None, 0, 10)?;
        assert_eq!(
            page.next_token.as_deref().map(Continuation::decode),
            Some(Continuation {
                page: Some("NEXT_PAGE_TOKEN".to_string()),
                skip: 0
            })
        );
        assert!(!page.complete);
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.id, "649def34f8be52c8b66281af98ae884c09aef38b");
        assert_eq!(first.authors, vec!["A. Lindsey"]);
        assert_eq!(first.summary.as_deref(), Some("Review of DAS."));
        assert_eq!(first.year, Some(2020));

        let second = &page.records[1];
        assert!(second.authors.is_empty());
        assert!(second.summary.is_none());
        assert!(second.venue.is_none());
        Ok(())
    }

    #[test]
    fn test_skip_applies_to_raw_entries() -> Result<()> {
        let page = slice_page(parse_bulk_response(SAMPLE_RESPONSE), None, 1, 10)?;
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "abc");
        Ok(())
    }

    #[test]
    fn test_last_page_is_complete() -> Result<()> {
        let page = slice_page(parse_bulk_response(r#"{"total": 0, "data": []}"#), None, 0, 10)?;
        assert!(page.complete);
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
        Ok(())
    }

    /// Bulk page of `count` well-formed papers, continued by `token`.
    fn bulk_body(count: usize, token: Option<&str>) -> String {
        let data: Vec<Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "paperId": format!("p{:02}", i),
                    "title": format!("Fiber sensing study {}", i),
                    "authors": [{"name": "A. Lindsey"}],
                    "year": 2021
                })
            })
            .collect();
        serde_json::json!({"total": count, "token": token, "data": data}).to_string()
    }

    fn ids(page: &Page) -> Vec<String> {
        page.records.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_bulk_page_is_handed_out_page_size_at_a_time() -> Result<()> {
        let response = || parse_bulk_response(&bulk_body(25, Some("T2")));

        let first = slice_page(response(), None, 0, 10)?;
        assert_eq!(first.records.len(), 10);
        assert!(!first.complete);
        assert_eq!(
            first.next_token.as_deref().map(Continuation::decode),
            Some(Continuation { page: None, skip: 10 })
        );

        let last = slice_page(response(), None, 20, 10)?;
        assert_eq!(ids(&last), vec!["p20", "p21", "p22", "p23", "p24"]);
        assert!(!last.complete);
        assert_eq!(
            last.next_token.as_deref().map(Continuation::decode),
            Some(Continuation {
                page: Some("T2".to_string()),
                skip: 0
            })
        );
        Ok(())
    }

    #[test]
    fn test_bare_upstream_token_starts_its_page() {
        assert_eq!(
            Continuation::decode("CgVoZWxsbw=="),
            Continuation {
                page: Some("CgVoZWxsbw==".to_string()),
                skip: 0
            }
        );
        assert_eq!(Continuation::decode(r#"{"skip":30}"#), Continuation { page: None, skip: 30 });
    }

    fn stub_client(base_url: &str) -> Result<SemanticScholarClient> {
        SemanticScholarClient::new(&BulkOptions {
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_slices_reuse_the_buffered_page() -> Result<()> {
        let server = StubServer::start(200, &bulk_body(25, None)).await?;
        let client = stub_client(&server.url)?;

        let first = client.fetch_page("das", 10, 0, None).await?;
        let second = client
            .fetch_page("das", 10, 10, first.next_token.as_deref())
            .await?;
        let third = client
            .fetch_page("das", 10, 20, second.next_token.as_deref())
            .await?;

        assert_eq!(ids(&first)[0], "p00");
        assert_eq!(ids(&second)[0], "p10");
        assert_eq!(ids(&third).len(), 5);
        assert!(third.complete);
        assert!(third.next_token.is_none());
        assert_eq!(server.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_token_supersedes_offset() -> Result<()> {
        let server = StubServer::start(200, SAMPLE_RESPONSE).await?;
        let client = stub_client(&server.url)?;

        let page = client.fetch_page("das", 10, 500, Some("RESUME_HERE")).await?;

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("token=RESUME_HERE"));
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, "649def34f8be52c8b66281af98ae884c09aef38b");
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_key_still_waits() -> Result<()> {
        let server = StubServer::start(403, r#"{"message": "Forbidden"}"#).await?;
        let client = stub_client(&server.url)?;

        let started = Instant::now();
        let err = client.fetch_page("das", 10, 0, None).await.err();

        assert!(matches!(err, Some(CrawlError::Authentication(_))));
        assert!(started.elapsed() >= MIN_DELAY);
        Ok(())
    }

    #[test]
    fn test_garbage_body_is_empty_page() {
        let response = parse_bulk_response("<html>Bad gateway</html>");
        assert!(response.data.is_empty());
        assert!(response.token.is_none());
    }

    #[test]
    fn test_build_bulk_url() -> Result<()> {
        let url = build_bulk_url(SS_API_BASE, "distributed acoustic sensing", Some("tok"))?;
        assert!(url.as_str().starts_with("https://api.semanticscholar.org/graph/v1/paper/search/bulk?"));
        assert!(url.as_str().contains("query=distributed+acoustic+sensing"));
        assert!(url.as_str().contains("token=tok"));

        let first = build_bulk_url(SS_API_BASE, "das", None)?;
        assert!(!first.as_str().contains("token="));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() -> Result<()> {
        let mut config = CrawlConfig::new(Backend::SemanticScholar, "das");
        config.semantic_scholar.api_key = None;
        // Unroutable endpoint: reaching the network would surface a transport error instead
        config.semantic_scholar.base_url = Some("http://127.0.0.1:9".to_string());

        let source = Source::from_config(&config)?;
        let err = source.fetch_page("das", 10, &Cursor::default()).await.err();
        assert!(matches!(err, Some(CrawlError::Authentication(_))));
        Ok(())
    }

    #[test]
    fn test_blank_key_counts_as_missing() -> Result<()> {
        let client = SemanticScholarClient::new(&BulkOptions {
            api_key: Some("   ".to_string()),
            ..Default::default()
        })?;
        assert!(client.api_key.is_none());
        Ok(())
    }
}
