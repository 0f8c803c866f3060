//! Per-origin robots.txt cache
//!
//! Each origin's robots.txt is fetched at most once per crawl. Concurrent
//! workers asking for the same origin wait on a shared [`OnceCell`] instead
//! of issuing duplicate requests.

use crate::robots::ParsedRobots;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

#[derive(Debug)]
pub struct RobotsCache {
    /// Agent token matched against User-agent groups
    agent: String,
    origins: DashMap<String, Arc<OnceCell<Arc<ParsedRobots>>>>,
}

impl RobotsCache {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            origins: DashMap::new(),
        }
    }

    /// Returns the cached rules for `url`'s origin, running `init` on first use
    pub async fn get_or_init<F, Fut>(&self, url: &Url, init: F) -> Arc<ParsedRobots>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ParsedRobots>,
    {
        let cell = self
            .origins
            .entry(url.origin().ascii_serialization())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| async { Arc::new(init().await) })
            .await
            .clone()
    }

    pub fn is_allowed(&self, robots: &ParsedRobots, url: &Url) -> bool {
        robots.is_allowed(url.as_str(), &self.agent)
    }

    pub fn crawl_delay(&self, robots: &ParsedRobots) -> Option<Duration> {
        robots.crawl_delay(&self.agent)
    }

    /// Number of origins with a fetch started or finished
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}
