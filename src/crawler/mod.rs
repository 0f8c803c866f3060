//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The URL frontier (dedup, priority, completion tracking)
//! - Fetch workers with per-host politeness and robots.txt
//! - The result processor (records, links, retries)
//! - Overall crawl orchestration

mod fetcher;
mod frontier;
mod orchestrator;
mod parser;
mod politeness;
mod processor;
mod retry;
mod worker;

pub use fetcher::{
    build_http_client, parse_retry_after, ErrorKind, FetchError, FetchOutcome, FetchResult,
    FetchedPage, Fetcher, HttpFetcher,
};
pub use frontier::{Claim, Completion, EnqueueOutcome, Frontier, FrontierSnapshot, UrlEntry};
pub use orchestrator::{CrawlReport, Orchestrator, OrchestratorState};
pub use parser::{parse_number, PageParser, ParsedPage};
pub use politeness::{Cancelled, HostRateLimiter, HostRateState};
pub use processor::{ProcessorStats, ResultProcessor};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{Worker, WorkerShared, WorkerStats};

use crate::config::Config;
use crate::output::{FailureSink, RecordSink};
use crate::Result;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl described by `config`
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Build the HTTP fetcher and compile the extraction rules
/// 2. Seed the frontier from the configured seeds
/// 3. Fetch pages under the politeness rules and follow links
/// 4. Stream records and failure reports to the given sinks
///
/// Firing `cancel` stops the crawl early; the report lists what was discarded.
pub async fn crawl(
    config: &Config,
    records: Box<dyn RecordSink>,
    failures: Box<dyn FailureSink>,
    cancel: CancellationToken,
) -> Result<CrawlReport> {
    Orchestrator::from_config(config)?
        .with_cancel_token(cancel)
        .run(&config.seeds, records, failures)
        .await
}
