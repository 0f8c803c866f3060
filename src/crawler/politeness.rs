//! Per-host politeness gate
//!
//! Every fetch start against a host must be at least `min_interval` after the
//! previous one. Hosts are tracked in a [`DashMap`] of `Arc<HostSlot>`; the
//! map shard lock is released before any await, and each slot serializes its
//! own waiters through a tokio mutex so requests to different hosts never wait
//! on each other.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The wait for a host slot was interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit wait cancelled")]
pub struct Cancelled;

/// Rate state for one host
#[derive(Debug, Clone)]
pub struct HostRateState {
    pub host: String,

    /// Start of the most recent fetch
    pub last_fetch_at: Option<Instant>,

    /// Effective spacing; raised by a robots.txt Crawl-delay
    pub min_interval: Duration,

    /// Server-requested pause (Retry-After)
    pub blocked_until: Option<Instant>,

    pub fetch_count: u64,
}

impl HostRateState {
    fn new(host: &str, min_interval: Duration) -> Self {
        Self {
            host: host.to_string(),
            last_fetch_at: None,
            min_interval,
            blocked_until: None,
            fetch_count: 0,
        }
    }

    /// Earliest instant the next fetch may start
    fn ready_at(&self, now: Instant) -> Instant {
        let spaced = self
            .last_fetch_at
            .map_or(now, |last| last + self.min_interval);
        match self.blocked_until {
            Some(blocked) => spaced.max(blocked),
            None => spaced,
        }
    }
}

#[derive(Debug)]
struct HostSlot {
    /// Held by the worker currently waiting for this host
    turn: tokio::sync::Mutex<()>,
    state: Mutex<HostRateState>,
}

impl HostSlot {
    fn state(&self) -> std::sync::MutexGuard<'_, HostRateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared per-host rate limiter
#[derive(Debug)]
pub struct HostRateLimiter {
    min_interval: Duration,
    hosts: DashMap<String, Arc<HostSlot>>,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            hosts: DashMap::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostSlot {
                    turn: tokio::sync::Mutex::new(()),
                    state: Mutex::new(HostRateState::new(host, self.min_interval)),
                })
            })
            .clone()
    }

    /// Waits until a fetch against `host` may start, then records the start
    ///
    /// The first fetch to a host proceeds immediately. Returns the recorded
    /// start instant, or [`Cancelled`] if the token fires while waiting.
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Result<Instant, Cancelled> {
        let slot = self.slot(host);

        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            guard = slot.turn.lock() => guard,
        };

        // Re-check after every sleep: a Retry-After may have arrived meanwhile
        loop {
            let now = Instant::now();
            let ready_at = slot.state().ready_at(now);
            if ready_at <= now {
                break;
            }

            trace!(host = %host, delay_ms = (ready_at - now).as_millis() as u64, "waiting for host slot");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        let started = Instant::now();
        let mut state = slot.state();
        state.last_fetch_at = Some(started);
        state.fetch_count += 1;
        Ok(started)
    }

    /// Raises the spacing for `host` to a robots.txt Crawl-delay
    ///
    /// The configured minimum interval is never lowered.
    pub fn set_crawl_delay(&self, host: &str, delay: Duration) {
        let slot = self.slot(host);
        let mut state = slot.state();
        state.min_interval = self.min_interval.max(delay);
        debug!(host = %host, interval_ms = state.min_interval.as_millis() as u64, "applied crawl delay");
    }

    /// Holds off every fetch to `host` for `delay` (server Retry-After)
    pub fn defer(&self, host: &str, delay: Duration) {
        let slot = self.slot(host);
        let until = Instant::now() + delay;
        let mut state = slot.state();
        if state.blocked_until.map_or(true, |current| current < until) {
            state.blocked_until = Some(until);
        }
        debug!(host = %host, delay_ms = delay.as_millis() as u64, "deferred host");
    }

    /// Snapshot of a host's rate state, if it has been seen
    pub fn state(&self, host: &str) -> Option<HostRateState> {
        self.hosts.get(host).map(|slot| slot.state().clone())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}
