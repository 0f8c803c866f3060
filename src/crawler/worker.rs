//! Fetch workers
//!
//! Each worker loops: claim an entry from the frontier, check robots.txt,
//! wait for the host's politeness slot, fetch under the configured timeout,
//! and hand the [`FetchResult`] to the result processor. Fetch errors are
//! sent as data; a worker only exits when the frontier is exhausted, the
//! crawl is cancelled, or the processor has gone away.

use crate::crawler::fetcher::{FetchError, FetchOutcome, FetchResult, Fetcher};
use crate::crawler::frontier::{Claim, Frontier, UrlEntry};
use crate::crawler::politeness::{Cancelled, HostRateLimiter};
use crate::robots::{fetch_robots, ParsedRobots, RobotsCache};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State shared by every worker in the pool
pub struct WorkerShared {
    pub frontier: Arc<Frontier>,
    pub fetcher: Arc<dyn Fetcher>,
    pub limiter: Arc<HostRateLimiter>,
    /// `None` when robots.txt is not honored
    pub robots: Option<Arc<RobotsCache>>,
    pub fetch_timeout: Duration,
    pub cancel: CancellationToken,
}

/// Per-worker counters returned when the worker exits
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    /// Page fetches started (robots.txt requests excluded)
    pub fetches: usize,
    /// Results handed to the processor
    pub results: usize,
}

pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    results: mpsc::Sender<FetchResult>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(id: usize, shared: Arc<WorkerShared>, results: mpsc::Sender<FetchResult>) -> Self {
        Self {
            id,
            shared,
            results,
            stats: WorkerStats::default(),
        }
    }

    pub async fn run(mut self) -> WorkerStats {
        debug!(worker = self.id, "worker started");

        loop {
            let mut entry = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                claim = self.shared.frontier.claim() => match claim {
                    Claim::Url(entry) => entry,
                    Claim::Exhausted => break,
                },
            };

            let outcome = self.process(&mut entry).await;
            let result = FetchResult {
                entry,
                fetched_at: Utc::now(),
                outcome,
            };

            // The receiver only disappears when the processor has stopped
            if self.results.send(result).await.is_err() {
                debug!(worker = self.id, "result channel closed");
                break;
            }
            self.stats.results += 1;
        }

        debug!(
            worker = self.id,
            fetches = self.stats.fetches,
            "worker finished"
        );
        self.stats
    }

    async fn process(&mut self, entry: &mut UrlEntry) -> FetchOutcome {
        let shared = Arc::clone(&self.shared);

        if let Some(robots) = &shared.robots {
            match self.robots_allows(robots, entry).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(url = %entry.url, "disallowed by robots.txt");
                    return FetchOutcome::Failed(FetchError::RobotsDenied);
                }
                Err(Cancelled) => return FetchOutcome::Aborted,
            }
        }

        if shared.limiter.acquire(&entry.host, &shared.cancel).await.is_err() {
            return FetchOutcome::Aborted;
        }

        entry.attempts += 1;
        self.stats.fetches += 1;
        trace!(worker = self.id, url = %entry.url, attempt = entry.attempts, "fetching");

        let fetch = tokio::time::timeout(shared.fetch_timeout, shared.fetcher.fetch(&entry.url));
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => FetchOutcome::Aborted,
            result = fetch => match result {
                Err(_) => FetchOutcome::Failed(FetchError::Timeout(shared.fetch_timeout)),
                Ok(Ok(page)) => FetchOutcome::Page(page),
                Ok(Err(error)) => {
                    if let FetchError::HttpStatus { retry_after: Some(delay), .. } = &error {
                        shared.limiter.defer(&entry.host, *delay);
                    }
                    FetchOutcome::Failed(error)
                }
            },
        }
    }

    /// Looks up (fetching on first use) the robots rules for the entry's origin
    async fn robots_allows(&self, robots: &RobotsCache, entry: &UrlEntry) -> Result<bool, Cancelled> {
        let shared = &self.shared;

        let rules = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(Cancelled),
            rules = robots.get_or_init(&entry.url, || self.load_robots(robots, entry)) => rules,
        };

        Ok(robots.is_allowed(&rules, &entry.url))
    }

    async fn load_robots(&self, robots: &RobotsCache, entry: &UrlEntry) -> ParsedRobots {
        let shared = &self.shared;

        // robots.txt requests count against the host's politeness budget too
        if shared.limiter.acquire(&entry.host, &shared.cancel).await.is_err() {
            return ParsedRobots::allow_all();
        }

        let rules = match tokio::time::timeout(
            shared.fetch_timeout,
            fetch_robots(shared.fetcher.as_ref(), &entry.url),
        )
        .await
        {
            Ok(rules) => rules,
            Err(_) => ParsedRobots::allow_all(),
        };

        if let Some(delay) = robots.crawl_delay(&rules) {
            shared.limiter.set_crawl_delay(&entry.host, delay);
        }
        rules
    }
}
