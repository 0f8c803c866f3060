//! Shared helpers for the integration tests

use async_trait::async_trait;
use shoal::config::{CrawlerConfig, SeedEntry};
use shoal::crawler::{FetchError, FetchedPage, Fetcher};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// How the scripted fetcher answers one URL
#[derive(Debug, Clone)]
pub enum Reply {
    Html(String),
    Status(u16),
    /// Never answers
    Hang,
}

/// In-memory fetcher answering from a fixed script
///
/// Unscripted URLs answer 404. Every call is recorded with its start instant.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    default: Option<Reply>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.replies
            .insert(normalize(url), Reply::Html(html.to_string()));
        self
    }

    pub fn status(mut self, url: &str, status: u16) -> Self {
        self.replies.insert(normalize(url), Reply::Status(status));
        self
    }

    /// Reply used for every unscripted URL
    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.default = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn attempts(&self, url: &str) -> usize {
        let url = normalize(url);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| normalize(called) == url)
            .count()
    }

    /// Start instants of every call against `host`, in call order
    pub fn starts_for_host(&self, host: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| Url::parse(called).unwrap().host_str() == Some(host))
            .map(|(_, at)| *at)
            .collect()
    }
}

fn normalize(url: &str) -> String {
    shoal::normalize_url(url).unwrap().to_string()
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let reply = self
            .replies
            .get(&normalize(url.as_str()))
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(Reply::Status(404));

        match reply {
            Reply::Html(html) => Ok(FetchedPage::html(url, html)),
            Reply::Status(status) => Err(FetchError::status(status)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Crawler settings for tests: no spacing, no robots, short backoffs
pub fn test_crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        worker_count: 4,
        min_interval_per_host: 0,
        fetch_timeout: 5_000,
        max_retries: 2,
        backoff_base: 100,
        backoff_max: 1_000,
        backoff_jitter: 0,
        max_pages: 0,
        max_depth: 3,
        respect_robots: false,
    }
}

pub fn seeds(urls: &[&str]) -> Vec<SeedEntry> {
    urls.iter().map(|url| SeedEntry::from(*url)).collect()
}

/// Polls `condition` until it holds, panicking after `limit`
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
