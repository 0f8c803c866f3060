//! Result processor
//!
//! A single task consumes every [`FetchResult`] the workers produce. Pages
//! are parsed into records (emitted to the record sink) and links (fed back
//! into the frontier). Failures are either scheduled for a retry after a
//! backoff or reported once to the failure sink.
//!
//! The processor owns both sinks; a sink error stops it and is returned to
//! the orchestrator as an unrecoverable fault.

use crate::crawler::fetcher::{FetchError, FetchOutcome, FetchResult, FetchedPage};
use crate::crawler::frontier::{Completion, EnqueueOutcome, Frontier, UrlEntry};
use crate::crawler::parser::PageParser;
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::output::{FailureReport, FailureSink, RecordSink, SinkResult};
use crate::url::{extract_host, normalize_url, HostScope};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Counters kept by the processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub pages_parsed: usize,
    pub records_emitted: usize,
    /// Links found on parsed pages, before any filtering
    pub links_discovered: usize,
    /// Links newly accepted by the frontier
    pub links_enqueued: usize,
    pub failures_reported: usize,
    pub retries_scheduled: usize,
}

pub struct ResultProcessor {
    frontier: Arc<Frontier>,
    parser: Arc<PageParser>,
    scope: HostScope,
    retry: RetryPolicy,
    max_depth: u32,
    records: Box<dyn RecordSink>,
    failures: Box<dyn FailureSink>,
    cancel: CancellationToken,
    backoffs: JoinSet<()>,
    stats: ProcessorStats,
}

impl ResultProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frontier: Arc<Frontier>,
        parser: Arc<PageParser>,
        scope: HostScope,
        retry: RetryPolicy,
        max_depth: u32,
        records: Box<dyn RecordSink>,
        failures: Box<dyn FailureSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            frontier,
            parser,
            scope,
            retry,
            max_depth,
            records,
            failures,
            cancel,
            backoffs: JoinSet::new(),
            stats: ProcessorStats::default(),
        }
    }

    /// Consumes results until every sender is gone, then flushes the sinks
    pub async fn run(mut self, mut results: mpsc::Receiver<FetchResult>) -> SinkResult<ProcessorStats> {
        loop {
            tokio::select! {
                Some(joined) = self.backoffs.join_next(), if !self.backoffs.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "backoff task failed");
                    }
                }
                message = results.recv() => match message {
                    Some(result) => self.handle(result)?,
                    None => break,
                },
            }
        }

        while self.backoffs.join_next().await.is_some() {}

        self.records.flush()?;
        self.failures.flush()?;

        debug!(
            records = self.stats.records_emitted,
            failures = self.stats.failures_reported,
            "result processor finished"
        );
        Ok(self.stats)
    }

    fn handle(&mut self, result: FetchResult) -> SinkResult<()> {
        let FetchResult { entry, outcome, .. } = result;

        match outcome {
            FetchOutcome::Page(page) => self.handle_page(entry, page),
            FetchOutcome::Failed(error) => self.handle_failure(entry, error),
            FetchOutcome::Aborted => {
                debug!(url = %entry.url, "fetch aborted");
                self.frontier.complete(&entry, Completion::Aborted);
                Ok(())
            }
        }
    }

    fn handle_page(&mut self, entry: UrlEntry, page: FetchedPage) -> SinkResult<()> {
        let parsed = match self.parser.parse_page(&page) {
            Ok(parsed) => parsed,
            Err(error) => return self.handle_failure(entry, error),
        };
        self.stats.pages_parsed += 1;

        for record in parsed.records {
            self.records.emit(record)?;
            self.stats.records_emitted += 1;
        }

        self.stats.links_discovered += parsed.links.len();
        if entry.depth < self.max_depth {
            for link in &parsed.links {
                self.follow(link, &entry);
            }
        }

        trace!(url = %entry.url, links = parsed.links.len(), "page processed");
        self.frontier.complete(&entry, Completion::Succeeded);
        Ok(())
    }

    /// Enqueues an in-scope link one level below its parent
    fn follow(&mut self, link: &str, parent: &UrlEntry) {
        let Ok(url) = normalize_url(link) else {
            return;
        };
        let Some(host) = extract_host(&url) else {
            return;
        };
        if !self.scope.classify(&host).should_follow() {
            trace!(url = %link, "out of scope");
            return;
        }

        match self
            .frontier
            .enqueue(link, parent.priority, parent.depth + 1)
        {
            EnqueueOutcome::Queued => self.stats.links_enqueued += 1,
            EnqueueOutcome::LimitReached => trace!(url = %link, "page budget reached"),
            EnqueueOutcome::Duplicate | EnqueueOutcome::Closed | EnqueueOutcome::Invalid(_) => {}
        }
    }

    fn handle_failure(&mut self, entry: UrlEntry, error: FetchError) -> SinkResult<()> {
        let kind = error.kind();

        match self.retry.decide(kind, entry.attempts) {
            RetryDecision::Retry { delay, attempt } => {
                debug!(
                    url = %entry.url,
                    error = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                self.frontier.begin_backoff();
                self.stats.retries_scheduled += 1;

                let frontier = Arc::clone(&self.frontier);
                let cancel = self.cancel.clone();
                self.backoffs.spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    frontier.requeue(entry);
                });
                Ok(())
            }
            RetryDecision::GiveUp => {
                warn!(url = %entry.url, error = %kind, attempts = entry.attempts, "giving up");
                self.failures.report(FailureReport {
                    url: entry.url.to_string(),
                    error_kind: kind,
                    attempts: entry.attempts,
                    message: error.to_string(),
                })?;
                self.stats.failures_reported += 1;
                self.frontier.complete(&entry, Completion::Failed);
                Ok(())
            }
        }
    }
}
