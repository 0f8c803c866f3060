//! HTTP fetcher implementation
//!
//! This module defines the [`Fetcher`] seam the worker pool fetches through,
//! the error taxonomy every failed fetch is classified into, and the
//! reqwest-backed [`HttpFetcher`] used in production.

use crate::config::UserAgentConfig;
use crate::crawler::frontier::UrlEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect::Policy, Client};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Longest server-mandated pause honored from a Retry-After header
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classification of a failed fetch, as reported to failure sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    HttpStatus(u16),
    Parse,
    RobotsDenied,
}

impl ErrorKind {
    /// Network failures, timeouts, and 5xx responses may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Timeout => true,
            Self::HttpStatus(code) => (500..600).contains(code),
            Self::Parse | Self::RobotsDenied => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "NetworkError"),
            Self::Timeout => write!(f, "TimeoutError"),
            Self::HttpStatus(code) => write!(f, "HTTPStatusError({})", code),
            Self::Parse => write!(f, "ParseError"),
            Self::RobotsDenied => write!(f, "RobotsDenied"),
        }
    }
}

/// A failed fetch or page parse
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status}")]
    HttpStatus {
        status: u16,
        /// Pause requested by the server via Retry-After
        retry_after: Option<Duration>,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("disallowed by robots.txt")]
    RobotsDenied,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::HttpStatus { status, .. } => ErrorKind::HttpStatus(*status),
            Self::Parse(_) => ErrorKind::Parse,
            Self::RobotsDenied => ErrorKind::RobotsDenied,
        }
    }

    pub fn status(status: u16) -> Self {
        Self::HttpStatus {
            status,
            retry_after: None,
        }
    }
}

/// A successfully fetched page (2xx response)
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative links resolve against it
    pub final_url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    /// Builds a 200 HTML page, mostly for scripted fetchers
    pub fn html(url: &Url, body: impl Into<String>) -> Self {
        Self {
            final_url: url.clone(),
            status_code: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into(),
        }
    }
}

/// What a worker hands to the result processor
#[derive(Debug)]
pub enum FetchOutcome {
    Page(FetchedPage),
    Failed(FetchError),
    /// Cancelled before the fetch completed
    Aborted,
}

/// Result of one claim/fetch cycle
#[derive(Debug)]
pub struct FetchResult {
    pub entry: UrlEntry,
    pub fetched_at: DateTime<Utc>,
    pub outcome: FetchOutcome,
}

/// Performs a single GET
///
/// Implementations report non-2xx responses as [`FetchError::HttpStatus`].
/// Timeouts are enforced by the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `CrawlerName/Version (+ContactURL; ContactEmail)`.
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent, timeout)?,
            timeout,
        })
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                retry_after,
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| self.classify(e))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Parses a Retry-After value: delay seconds or an HTTP date
///
/// Dates in the past yield zero; values beyond one hour are capped.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let at = DateTime::parse_from_rfc2822(value).ok()?;
        (at.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    };

    Some(delay.min(MAX_RETRY_AFTER))
}
