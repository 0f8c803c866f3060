//! URL handling module for Shoal
//!
//! This module provides URL normalization, host extraction, wildcard host
//! patterns, and the scope check that decides which discovered links are
//! followed.

mod host;
mod normalize;

pub use host::{extract_host, HostPattern};
pub use normalize::normalize_url;

use crate::config::ScopeConfig;
use std::collections::HashSet;

/// Where a discovered host falls relative to the crawl scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    /// Host may be crawled
    InScope,
    /// Host matches a blocked pattern
    Blocked,
    /// Host is neither a seed host nor allowed
    OutOfScope,
}

impl HostClass {
    /// Returns true if links to this host should be followed
    pub fn should_follow(&self) -> bool {
        matches!(self, Self::InScope)
    }
}

/// Compiled scope rules
///
/// Blocked patterns take priority. When no allowed patterns are configured,
/// only the seed hosts are in scope.
#[derive(Debug, Clone, Default)]
pub struct HostScope {
    allowed: Vec<HostPattern>,
    blocked: Vec<HostPattern>,
    seed_hosts: HashSet<String>,
}

impl HostScope {
    pub fn new(config: &ScopeConfig) -> Self {
        Self {
            allowed: config.allowed_hosts.iter().map(|p| HostPattern::parse(p)).collect(),
            blocked: config.blocked_hosts.iter().map(|p| HostPattern::parse(p)).collect(),
            seed_hosts: HashSet::new(),
        }
    }

    /// A scope that accepts every host
    pub fn unrestricted() -> Self {
        Self {
            allowed: vec![HostPattern::Any],
            ..Self::default()
        }
    }

    pub fn add_seed_host(&mut self, host: &str) {
        self.seed_hosts.insert(host.to_lowercase());
    }

    /// Classifies a lowercase host
    pub fn classify(&self, host: &str) -> HostClass {
        if self.blocked.iter().any(|p| p.matches(host)) {
            return HostClass::Blocked;
        }

        let allowed = if self.allowed.is_empty() {
            self.seed_hosts.contains(host)
        } else {
            self.allowed.iter().any(|p| p.matches(host))
        };

        if allowed {
            HostClass::InScope
        } else {
            HostClass::OutOfScope
        }
    }
}
