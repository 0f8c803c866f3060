use url::Url;

/// Returns the lowercase host of a URL, or `None` for host-less URLs
///
/// # Examples
///
/// ```
/// use url::Url;
/// use shoal::url::extract_host;
///
/// let url = Url::parse("https://Books.ToScrape.com:8443/index.html").unwrap();
/// assert_eq!(extract_host(&url), Some("books.toscrape.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// A host pattern from the scope configuration
///
/// `example.com` matches only that host; `*.example.com` matches the bare
/// host and any subdomain of it; `*` matches every host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Any,
    Exact(String),
    Subdomains(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_lowercase();
        if pattern == "*" {
            return Self::Any;
        }
        match pattern.strip_prefix("*.") {
            Some(base) => Self::Subdomains(base.to_string()),
            None => Self::Exact(pattern),
        }
    }

    /// `host` must already be lowercase
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => host == exact,
            Self::Subdomains(base) => {
                host == base
                    || host
                        .strip_suffix(base.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }
        }
    }
}
