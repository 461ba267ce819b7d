use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::parser::{self, FeedEntry, Page};

const USER_AGENT: &str = concat!("watchlist_sync/", env!("CARGO_PKG_VERSION"));
const BASE_BACKOFF_MS: u64 = 2000;

/// Anything that can hand back the raw markup of a feed page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

/// Fetches feed pages over HTTP(S) with a per-request timeout and bounded
/// retries for transient failures.
pub struct HttpSource {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpSource {
    pub fn new(options: FetchOptions) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, options })
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| SyncError::network(url, e))
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    let backoff = self.options.backoff * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        "{} (attempt {}/{}), retrying in {:.1}s",
                        e,
                        attempt,
                        self.options.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }
}

/// Walks a feed's `rel="next"` chain one page at a time.
///
/// Stops when a page has no next link, after `max_pages` pages, or when a next
/// link points back at a page already visited in this walk. A fetch or parse
/// error ends the walk.
pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    cursor: Option<String>,
    visited: HashSet<String>,
    fetched: usize,
    max_pages: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(source: &'a dyn PageSource, start_url: &str, max_pages: usize) -> Self {
        Self {
            source,
            cursor: Some(start_url.to_string()),
            visited: HashSet::new(),
            fetched: 0,
            max_pages,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }

    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        let Some(url) = self.cursor.take() else {
            return Ok(None);
        };
        if self.fetched >= self.max_pages {
            warn!(
                "Stopping after {} pages; {} was not fetched",
                self.max_pages, url
            );
            return Ok(None);
        }

        let body = self.source.fetch(&url).await?;
        let mut page = parser::parse_page(&body)?;
        self.fetched += 1;
        info!("Page {}: {} entries from {}", self.fetched, page.entries.len(), url);

        if let Some(next) = page.next_page_url.take() {
            let next = resolve(&url, &next);
            self.visited.insert(url);
            if self.visited.contains(&next) {
                warn!("Next link {} was already visited; ending pagination", next);
            } else {
                page.next_page_url = Some(next.clone());
                self.cursor = Some(next);
            }
        }

        Ok(Some(page))
    }
}

/// Fetch every page starting at `start_url` and return all entries in feed order.
pub async fn fetch_all(
    source: &dyn PageSource,
    start_url: &str,
    max_pages: usize,
) -> Result<Vec<FeedEntry>> {
    let mut pages = Paginator::new(source, start_url, max_pages);
    let mut entries = Vec::new();
    while let Some(page) = pages.next_page().await? {
        entries.extend(page.entries);
    }
    info!("Fetched {} entries from {} pages", entries.len(), pages.pages_fetched());
    Ok(entries)
}

/// Resolve a possibly relative next link against the page it came from.
fn resolve(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::{feed_page, ScriptedSource};
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn titles(entries: &[FeedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.title.as_str()).collect()
    }

    #[tokio::test]
    async fn follows_next_links_in_order() {
        let source = ScriptedSource::new()
            .page("https://e.com/p1", feed_page(&["a", "b"], Some("https://e.com/p2")))
            .page("https://e.com/p2", feed_page(&["c"], Some("https://e.com/p3")))
            .page("https://e.com/p3", feed_page(&["d", "e"], None));

        let entries = fetch_all(&source, "https://e.com/p1", 100).await.unwrap();
        assert_eq!(titles(&entries), ["a", "b", "c", "d", "e"]);
        assert_eq!(
            source.calls(),
            ["https://e.com/p1", "https://e.com/p2", "https://e.com/p3"]
        );
    }

    #[tokio::test]
    async fn page_cap_bounds_the_walk() {
        let source = ScriptedSource::new()
            .page("https://e.com/p1", feed_page(&["a"], Some("https://e.com/p2")))
            .page("https://e.com/p2", feed_page(&["b"], Some("https://e.com/p3")))
            .page("https://e.com/p3", feed_page(&["c"], None));

        let entries = fetch_all(&source, "https://e.com/p1", 2).await.unwrap();
        assert_eq!(titles(&entries), ["a", "b"]);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn cyclic_next_links_terminate() {
        let source = ScriptedSource::new()
            .page("https://e.com/p1", feed_page(&["a"], Some("https://e.com/p2")))
            .page("https://e.com/p2", feed_page(&["b"], Some("https://e.com/p1")));

        let entries = fetch_all(&source, "https://e.com/p1", 100).await.unwrap();
        assert_eq!(titles(&entries), ["a", "b"]);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn self_referencing_page_fetched_once() {
        let source = ScriptedSource::new()
            .page("https://e.com/p1", feed_page(&["a"], Some("https://e.com/p1")));
        let entries = fetch_all(&source, "https://e.com/p1", 100).await.unwrap();
        assert_eq!(titles(&entries), ["a"]);
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn relative_next_links_resolve() {
        let source = ScriptedSource::new()
            .page("https://e.com/feed?page=1", feed_page(&["a"], Some("/feed?page=2")))
            .page("https://e.com/feed?page=2", feed_page(&["b"], None));
        let entries = fetch_all(&source, "https://e.com/feed?page=1", 100).await.unwrap();
        assert_eq!(titles(&entries), ["a", "b"]);
    }

    #[tokio::test]
    async fn failure_mid_chain_aborts() {
        let source = ScriptedSource::new()
            .page("https://e.com/p1", feed_page(&["a"], Some("https://e.com/p2")));
        let mut pages = Paginator::new(&source, "https://e.com/p1", 100);

        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(titles(&first.entries), ["a"]);
        let err = pages.next_page().await.unwrap_err();
        assert!(err.is_network());
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(pages.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn parse_error_aborts() {
        let source = ScriptedSource::new().page("https://e.com/p1", "<rss><channel>".into());
        let err = fetch_all(&source, "https://e.com/p1", 100).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    fn fast_options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn http_pages_over_the_wire() {
        let server = MockServer::start().await;
        let page2 = format!("{}/feed?page=2", server.uri());

        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_page(&["b"], None)))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(feed_page(&["a"], Some(&page2))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpSource::new(fast_options()).unwrap();
        let entries = fetch_all(&source, &format!("{}/feed", server.uri()), 100)
            .await
            .unwrap();
        assert_eq!(titles(&entries), ["a", "b"]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpSource::new(fast_options()).unwrap();
        let err = source.fetch(&format!("{}/feed", server.uri())).await.unwrap_err();
        assert!(matches!(err, SyncError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpSource::new(fast_options()).unwrap();
        let body = source.fetch(&server.uri()).await.unwrap();
        assert_eq!(body, "<rss/>");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let source = HttpSource::new(fast_options()).unwrap();
        let err = source.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, SyncError::Status { status: 502, .. }));
    }
}
