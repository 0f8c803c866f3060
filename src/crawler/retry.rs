//! Retry decisions with exponential backoff
//!
//! A failed fetch is retried when its [`ErrorKind`] is retryable and it has
//! not yet used up `max_retries` requeues. The n-th retry waits
//! `base * 2^(n-1)`, capped at `max`, plus up to `jitter` of random delay.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::ErrorKind;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Decision for one failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after `delay`; `attempt` is the number the next fetch will carry
    Retry { delay: Duration, attempt: u32 },

    /// Report the failure permanently
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            base,
            max: max.max(base),
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(config.max_retries, config.backoff_base(), config.backoff_max())
            .with_jitter(config.backoff_jitter())
    }

    /// Decides what to do after attempt number `attempts` (1-indexed) failed with `kind`
    pub fn decide(&self, kind: ErrorKind, attempts: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempts > self.max_retries {
            debug!(attempts, max_retries = self.max_retries, "retry budget exhausted");
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempts),
            attempt: attempts + 1,
        }
    }

    /// Backoff before retry number `retry` (1-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter.is_zero() {
            return delay;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }
}
