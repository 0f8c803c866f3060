//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! It respects robots.txt directives when crawling websites.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::ParsedRobots;

use crate::crawler::{FetchError, Fetcher};
use tracing::{debug, warn};
use url::Url;

/// Location of the robots.txt governing `page_url`
pub fn robots_url(page_url: &Url) -> Option<Url> {
    page_url.join("/robots.txt").ok()
}

/// Fetches and parses robots.txt for the origin of `page_url`
///
/// A missing file (4xx) allows everything. Any other failure also allows
/// everything, with a warning, so an unreachable robots.txt never blocks
/// the crawl outright.
pub async fn fetch_robots(fetcher: &dyn Fetcher, page_url: &Url) -> ParsedRobots {
    let Some(url) = robots_url(page_url) else {
        return ParsedRobots::allow_all();
    };

    match fetcher.fetch(&url).await {
        Ok(page) => {
            debug!(url = %url, bytes = page.body.len(), "fetched robots.txt");
            ParsedRobots::from_content(&page.body)
        }
        Err(FetchError::HttpStatus { status, .. }) if (400..500).contains(&status) => {
            debug!(url = %url, status, "no robots.txt");
            ParsedRobots::allow_all()
        }
        Err(e) => {
            warn!(url = %url, error = %e, "robots.txt unavailable, allowing all");
            ParsedRobots::allow_all()
        }
    }
}
