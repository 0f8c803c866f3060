//! Crawl orchestrator
//!
//! Owns the crawl lifecycle:
//!
//! ```text
//! Idle --run--> Running --frontier idle or cancel--> Draining --workers and processor done--> Stopped
//! ```
//!
//! The orchestrator seeds the frontier, starts `worker-count` fetch workers
//! and one result processor, and waits for the frontier to drain or for the
//! cancellation token to fire. On cancellation every unclaimed entry is
//! discarded and in-flight fetches are aborted. A sink failure inside the
//! processor is fatal: everything is cancelled and the error is returned.

use crate::config::{Config, CrawlerConfig, ScopeConfig, SeedEntry};
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::frontier::{EnqueueOutcome, Frontier};
use crate::crawler::parser::PageParser;
use crate::crawler::politeness::HostRateLimiter;
use crate::crawler::processor::{ProcessorStats, ResultProcessor};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::worker::{Worker, WorkerShared, WorkerStats};
use crate::output::{FailureSink, RecordSink};
use crate::robots::RobotsCache;
use crate::url::{extract_host, normalize_url, HostScope};
use crate::{Result, ShoalError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of an [`Orchestrator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Final accounting of a crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub state: OrchestratorState,
    pub cancelled: bool,

    /// Unique URLs accepted by the frontier
    pub enqueued: usize,
    pub succeeded: usize,
    /// Reported as permanently failed
    pub failed: usize,
    /// Unclaimed when the crawl was cancelled
    pub discarded: usize,
    /// In flight when the crawl was cancelled
    pub aborted: usize,
    /// Still unsettled; zero after a clean stop
    pub pending: usize,

    pub retries: usize,
    pub fetch_attempts: usize,
    pub records_emitted: usize,
    pub links_discovered: usize,
    pub failures_reported: usize,

    pub discarded_urls: Vec<String>,
    pub aborted_urls: Vec<String>,
    pub elapsed: Duration,
}

impl CrawlReport {
    /// Every accepted URL ended in exactly one bucket
    pub fn is_conserved(&self) -> bool {
        self.enqueued
            == self.succeeded + self.failed + self.discarded + self.aborted + self.pending
    }
}

/// Drives one crawl from seeds to a [`CrawlReport`]
pub struct Orchestrator {
    crawler: CrawlerConfig,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<PageParser>,
    scope: ScopeConfig,
    robots_agent: String,
    cancel: CancellationToken,
    state: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(crawler: CrawlerConfig, fetcher: Arc<dyn Fetcher>, parser: PageParser) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            crawler,
            fetcher,
            parser: Arc::new(parser),
            scope: ScopeConfig::default(),
            robots_agent: env!("CARGO_PKG_NAME").to_string(),
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// Builds an orchestrator with the reqwest fetcher and the configured extraction rules
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.crawler.fetch_timeout())?;
        let parser = PageParser::new(&config.extract)?;

        Ok(Self::new(config.crawler.clone(), Arc::new(fetcher), parser)
            .with_scope(config.scope.clone())
            .with_robots_agent(config.user_agent.crawler_name.clone()))
    }

    pub fn with_scope(mut self, scope: ScopeConfig) -> Self {
        self.scope = scope;
        self
    }

    /// Agent token matched against robots.txt groups
    pub fn with_robots_agent(mut self, agent: impl Into<String>) -> Self {
        self.robots_agent = agent.into();
        self
    }

    /// Uses an externally owned token, e.g. one fired by a signal handler
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the crawl when fired; clones may be handed to signal handlers
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: OrchestratorState) {
        debug!(state = %next, "orchestrator state");
        self.state.send_replace(next);
    }

    /// Moves Idle to Running, or reports the state that prevented it
    fn start(&self) -> Result<()> {
        let mut from = OrchestratorState::Idle;
        let started = self.state.send_if_modified(|state| {
            from = *state;
            if *state == OrchestratorState::Idle {
                *state = OrchestratorState::Running;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            Err(ShoalError::InvalidTransition {
                from,
                to: OrchestratorState::Running,
            })
        }
    }

    /// Runs the crawl to completion or cancellation
    ///
    /// Only valid on an idle orchestrator; a finished one stays `Stopped`.
    pub async fn run(
        &self,
        seeds: &[SeedEntry],
        records: Box<dyn RecordSink>,
        failures: Box<dyn FailureSink>,
    ) -> Result<CrawlReport> {
        self.start()?;
        let started = Instant::now();

        let frontier = Arc::new(Frontier::new(self.crawler.page_budget()));
        let scope = self.seed(&frontier, seeds);
        frontier.close_if_idle();

        let worker_count = self.crawler.worker_count.max(1) as usize;
        info!(
            seeds = seeds.len(),
            enqueued = frontier.snapshot().enqueued,
            workers = worker_count,
            "crawl started"
        );

        let shared = Arc::new(WorkerShared {
            frontier: Arc::clone(&frontier),
            fetcher: Arc::clone(&self.fetcher),
            limiter: Arc::new(HostRateLimiter::new(self.crawler.min_interval())),
            robots: self
                .crawler
                .respect_robots
                .then(|| Arc::new(RobotsCache::new(self.robots_agent.clone()))),
            fetch_timeout: self.crawler.fetch_timeout(),
            cancel: self.cancel.clone(),
        });

        let (tx, rx) = mpsc::channel(worker_count * 2);
        let processor = ResultProcessor::new(
            Arc::clone(&frontier),
            Arc::clone(&self.parser),
            scope,
            RetryPolicy::from_config(&self.crawler),
            self.crawler.max_depth,
            records,
            failures,
            self.cancel.clone(),
        );
        let mut processor_handle = tokio::spawn(processor.run(rx));

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(Worker::new(id, Arc::clone(&shared), tx.clone()).run());
        }
        drop(tx);

        let mut early_exit = None;
        tokio::select! {
            _ = frontier.wait_drained() => {}
            _ = self.cancel.cancelled() => {}
            joined = &mut processor_handle => early_exit = Some(joined),
        }
        self.set_state(OrchestratorState::Draining);
        // let state subscribers observe Draining before Stopped replaces it
        tokio::task::yield_now().await;

        let mut processor_stats = None;
        if let Some(joined) = early_exit {
            match flatten(joined) {
                Ok(stats) => processor_stats = Some(stats),
                Err(e) => return Err(self.abort(&frontier, &mut workers, e).await),
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            let dropped = frontier.cancel();
            info!(discarded = dropped.len(), "crawl cancelled");
        }

        let mut fetch_attempts = 0;
        let mut worker_failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => fetch_attempts += stats.fetches,
                Err(e) => {
                    error!(error = %e, "worker task failed");
                    worker_failure.get_or_insert(ShoalError::Task(e));
                }
            }
        }

        let processor_stats = match processor_stats {
            Some(stats) => stats,
            None => match flatten(processor_handle.await) {
                Ok(stats) => stats,
                Err(e) => return Err(self.abort(&frontier, &mut workers, e).await),
            },
        };

        if let Some(e) = worker_failure {
            return Err(self.abort(&frontier, &mut workers, e).await);
        }

        self.set_state(OrchestratorState::Stopped);

        let report = build_report(
            &frontier,
            cancelled,
            fetch_attempts,
            processor_stats,
            started.elapsed(),
        );
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            aborted = report.aborted,
            records = report.records_emitted,
            "crawl stopped"
        );
        if !report.is_conserved() {
            warn!(?report, "crawl accounting does not balance");
        }

        Ok(report)
    }

    /// Validates and enqueues the seeds; their hosts form the default scope
    fn seed(&self, frontier: &Frontier, seeds: &[SeedEntry]) -> HostScope {
        let mut scope = HostScope::new(&self.scope);

        for seed in seeds {
            let url = match normalize_url(&seed.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(seed = %seed.url, error = %e, "skipping invalid seed");
                    continue;
                }
            };
            if let Some(host) = extract_host(&url) {
                scope.add_seed_host(&host);
            }

            match frontier.enqueue(&seed.url, seed.priority, 0) {
                EnqueueOutcome::Queued => debug!(seed = %url, "seeded"),
                EnqueueOutcome::Duplicate => debug!(seed = %url, "duplicate seed"),
                EnqueueOutcome::LimitReached => warn!(seed = %url, "page budget reached while seeding"),
                EnqueueOutcome::Closed | EnqueueOutcome::Invalid(_) => {}
            }
        }

        scope
    }

    /// Tears everything down after an unrecoverable fault
    async fn abort(
        &self,
        frontier: &Frontier,
        workers: &mut JoinSet<WorkerStats>,
        error: ShoalError,
    ) -> ShoalError {
        error!(error = %error, "crawl failed");
        frontier.cancel();
        self.cancel.cancel();
        workers.shutdown().await;
        self.set_state(OrchestratorState::Stopped);
        error
    }
}

fn flatten(
    joined: std::result::Result<crate::output::SinkResult<ProcessorStats>, tokio::task::JoinError>,
) -> Result<ProcessorStats> {
    Ok(joined??)
}

fn build_report(
    frontier: &Frontier,
    cancelled: bool,
    fetch_attempts: usize,
    processor: ProcessorStats,
    elapsed: Duration,
) -> CrawlReport {
    let snapshot = frontier.snapshot();
    CrawlReport {
        state: OrchestratorState::Stopped,
        cancelled,
        enqueued: snapshot.enqueued,
        succeeded: snapshot.succeeded,
        failed: snapshot.failed,
        discarded: snapshot.discarded,
        aborted: snapshot.aborted,
        pending: snapshot.outstanding(),
        retries: snapshot.retries,
        fetch_attempts,
        records_emitted: processor.records_emitted,
        links_discovered: processor.links_discovered,
        failures_reported: processor.failures_reported,
        discarded_urls: frontier.discarded_urls(),
        aborted_urls: frontier.aborted_urls(),
        elapsed,
    }
}
