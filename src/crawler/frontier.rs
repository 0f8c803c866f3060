//! URL frontier: the set of discovered-but-unfetched URLs
//!
//! The frontier deduplicates by normalized URL, hands out entries in
//! priority order (FIFO among equal priorities), and tracks every accepted
//! URL until it is settled as succeeded, failed, discarded, or aborted.
//!
//! Claimers suspend on a [`Notify`] while the queue is empty. The frontier
//! closes itself once nothing is pending, in flight, or waiting out a retry
//! backoff; claimers then receive [`Claim::Exhausted`].

use crate::url::{extract_host, normalize_url};
use crate::UrlError;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use url::Url;

/// A URL owned by the frontier until a worker claims it
#[derive(Debug, Clone)]
pub struct UrlEntry {
    /// URL as discovered, minus the fragment; this is what gets fetched
    pub url: Url,

    /// Normalized form of `url`, the deduplication key
    pub key: String,

    pub host: String,

    /// Higher values are claimed first
    pub priority: i32,

    /// Link hops from the seed that led here
    pub depth: u32,

    pub discovered_at: DateTime<Utc>,

    /// Fetch attempts made so far
    pub attempts: u32,

    /// Discovery order, used to break priority ties
    sequence: u64,
}

/// Heap wrapper: highest priority first, then lowest sequence
#[derive(Debug)]
struct Queued(UrlEntry);

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

/// Result of [`Frontier::enqueue`]
#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued,
    /// Already seen; nothing changed
    Duplicate,
    /// Frontier no longer accepts new URLs
    Closed,
    /// The page budget is used up
    LimitReached,
    Invalid(UrlError),
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Result of [`Frontier::claim`]
#[derive(Debug)]
pub enum Claim {
    Url(UrlEntry),
    /// Closed and truly empty, or cancelled
    Exhausted,
}

/// How a claimed entry left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    /// Permanently failed and reported
    Failed,
    /// Cancelled while in flight
    Aborted,
}

/// Point-in-time counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierSnapshot {
    /// Unique URLs accepted
    pub enqueued: usize,
    /// Waiting in the queue
    pub pending: usize,
    /// Claimed and not yet settled
    pub in_flight: usize,
    /// Waiting out a retry delay
    pub backing_off: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub discarded: usize,
    pub aborted: usize,
    /// Requeues performed for retries
    pub retries: usize,
    pub closed: bool,
    pub cancelled: bool,
}

impl FrontierSnapshot {
    /// Entries not yet settled
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_flight + self.backing_off
    }

    /// Every accepted URL is accounted for exactly once
    pub fn is_conserved(&self) -> bool {
        self.enqueued
            == self.succeeded + self.failed + self.discarded + self.aborted + self.outstanding()
    }
}

#[derive(Debug, Default)]
struct FrontierInner {
    queue: BinaryHeap<Queued>,
    seen: HashSet<String>,
    next_sequence: u64,
    in_flight: usize,
    backing_off: usize,
    succeeded: usize,
    failed: usize,
    aborted: usize,
    retries: usize,
    closed: bool,
    cancelled: bool,
    discarded: Vec<String>,
    aborted_urls: Vec<String>,
}

impl FrontierInner {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0 && self.backing_off == 0
    }

    fn is_drained(&self) -> bool {
        self.cancelled || (self.closed && self.is_idle())
    }
}

/// Deduplicating priority queue shared by the workers and the result processor
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    available: Notify,
    drained: watch::Sender<bool>,
    page_budget: Option<usize>,
}

impl Frontier {
    /// Creates an empty frontier; `page_budget` caps the number of unique URLs accepted
    pub fn new(page_budget: Option<usize>) -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            inner: Mutex::new(FrontierInner::default()),
            available: Notify::new(),
            drained,
            page_budget,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a URL unless its normalized form was seen before
    ///
    /// The URL is fetched as given (fragment dropped); only the dedup key is
    /// normalized, so `/docs/` is still requested with its trailing slash.
    pub fn enqueue(&self, url: &str, priority: i32, depth: u32) -> EnqueueOutcome {
        let key = match normalize_url(url) {
            Ok(normalized) => normalized,
            Err(e) => return EnqueueOutcome::Invalid(e),
        };
        let Some(host) = extract_host(&key) else {
            return EnqueueOutcome::Invalid(UrlError::MissingHost);
        };
        let mut url = match Url::parse(url.trim()) {
            Ok(url) => url,
            Err(e) => return EnqueueOutcome::Invalid(UrlError::Parse(e.to_string())),
        };
        url.set_fragment(None);
        let key = key.to_string();

        let mut inner = self.lock();
        if inner.closed {
            return EnqueueOutcome::Closed;
        }
        if inner.seen.contains(&key) {
            return EnqueueOutcome::Duplicate;
        }
        if self
            .page_budget
            .is_some_and(|budget| inner.seen.len() >= budget)
        {
            return EnqueueOutcome::LimitReached;
        }

        inner.seen.insert(key.clone());
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.queue.push(Queued(UrlEntry {
            url,
            key,
            host,
            priority,
            depth,
            discovered_at: Utc::now(),
            attempts: 0,
            sequence,
        }));
        drop(inner);

        self.available.notify_one();
        EnqueueOutcome::Queued
    }

    /// Waits for the next entry
    ///
    /// Returns [`Claim::Exhausted`] once the frontier is closed and nothing
    /// is pending, in flight, or backing off, or as soon as it is cancelled.
    pub async fn claim(&self) -> Claim {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.cancelled {
                    return Claim::Exhausted;
                }
                if let Some(Queued(entry)) = inner.queue.pop() {
                    inner.in_flight += 1;
                    return Claim::Url(entry);
                }
                if inner.is_drained() {
                    return Claim::Exhausted;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting new URLs; claimers drain what is left
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.settle(&mut inner);
    }

    /// Closes the frontier only if there is nothing left to do
    pub fn close_if_idle(&self) {
        let mut inner = self.lock();
        if inner.is_idle() {
            inner.closed = true;
            self.settle(&mut inner);
        }
    }

    /// Settles a claimed entry
    pub fn complete(&self, entry: &UrlEntry, completion: Completion) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        match completion {
            Completion::Succeeded => inner.succeeded += 1,
            Completion::Failed => inner.failed += 1,
            Completion::Aborted => {
                inner.aborted += 1;
                inner.aborted_urls.push(entry.url.to_string());
            }
        }
        if inner.is_idle() {
            inner.closed = true;
        }
        self.settle(&mut inner);
    }

    /// Moves a claimed entry into the retry backoff state
    pub fn begin_backoff(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.backing_off += 1;
    }

    /// Returns an entry to the queue after its backoff, bypassing dedup
    ///
    /// After cancellation the entry is discarded instead.
    pub fn requeue(&self, entry: UrlEntry) {
        let mut inner = self.lock();
        inner.backing_off = inner.backing_off.saturating_sub(1);

        if inner.cancelled {
            inner.discarded.push(entry.url.to_string());
            self.settle(&mut inner);
            return;
        }

        inner.retries += 1;
        inner.queue.push(Queued(entry));
        drop(inner);
        self.available.notify_one();
    }

    /// Closes the frontier and discards every unclaimed entry
    ///
    /// Returns the URLs discarded by this call.
    pub fn cancel(&self) -> Vec<String> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.cancelled = true;

        let dropped: Vec<String> = std::mem::take(&mut inner.queue)
            .into_iter()
            .map(|Queued(entry)| entry.url.to_string())
            .collect();
        inner.discarded.extend(dropped.iter().cloned());

        self.settle(&mut inner);
        dropped
    }

    /// Wakes claimers and publishes the drained flag when appropriate
    fn settle(&self, inner: &mut FrontierInner) {
        if inner.is_drained() {
            self.drained.send_replace(true);
            self.available.notify_waiters();
        }
    }

    /// Resolves once the frontier is closed and idle, or cancelled
    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        // The sender lives in self, so this only errors if the frontier is dropped
        let _ = rx.wait_for(|drained| *drained).await;
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let inner = self.lock();
        FrontierSnapshot {
            enqueued: inner.seen.len(),
            pending: inner.queue.len(),
            in_flight: inner.in_flight,
            backing_off: inner.backing_off,
            succeeded: inner.succeeded,
            failed: inner.failed,
            discarded: inner.discarded.len(),
            aborted: inner.aborted,
            retries: inner.retries,
            closed: inner.closed,
            cancelled: inner.cancelled,
        }
    }

    pub fn discarded_urls(&self) -> Vec<String> {
        self.lock().discarded.clone()
    }

    pub fn aborted_urls(&self) -> Vec<String> {
        self.lock().aborted_urls.clone()
    }
}
