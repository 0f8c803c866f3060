use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Shoal
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Crawler behavior configuration
///
/// All durations are expressed in milliseconds in the TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    pub worker_count: u32,

    /// Minimum time between fetch starts against the same host
    pub min_interval_per_host: u64,

    /// Per-fetch timeout
    pub fetch_timeout: u64,

    /// Number of times a retryable failure is requeued
    pub max_retries: u32,

    /// Delay before the first retry; doubled on every further attempt
    pub backoff_base: u64,

    /// Upper bound on a single backoff delay
    pub backoff_max: u64,

    /// Maximum random jitter added to each backoff delay
    pub backoff_jitter: u64,

    /// Maximum number of unique URLs accepted (0 = unlimited)
    pub max_pages: u32,

    /// Maximum link hops from a seed URL
    pub max_depth: u32,

    /// Whether robots.txt is fetched and honored
    pub respect_robots: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            min_interval_per_host: 1000,
            fetch_timeout: 30_000,
            max_retries: 2,
            backoff_base: 500,
            backoff_max: 30_000,
            backoff_jitter: 0,
            max_pages: 0,
            max_depth: 3,
            respect_robots: true,
        }
    }
}

impl CrawlerConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_per_host)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max)
    }

    pub fn backoff_jitter(&self) -> Duration {
        Duration::from_millis(self.backoff_jitter)
    }

    /// The page budget, or `None` when unlimited
    pub fn page_budget(&self) -> Option<usize> {
        (self.max_pages > 0).then_some(self.max_pages as usize)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// JSON Lines destination for records; "-" means stdout
    #[serde(default = "default_records_path")]
    pub records_path: String,

    /// JSON Lines destination for failure reports; "-" means stdout
    #[serde(default = "default_failures_path")]
    pub failures_path: String,

    /// SQLite database receiving both streams instead of the JSON Lines files
    #[serde(default)]
    pub database_path: Option<String>,
}

fn default_records_path() -> String {
    "-".to_string()
}

fn default_failures_path() -> String {
    "failures.jsonl".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            failures_path: default_failures_path(),
            database_path: None,
        }
    }
}

/// Which hosts discovered links may lead to
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopeConfig {
    /// Host patterns (e.g., "example.com" or "*.example.com"); empty means seed hosts only
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Host patterns never followed, even when allowed
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
}

/// A seed URL with its frontier priority
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,

    /// Higher values are claimed first
    #[serde(default)]
    pub priority: i32,
}

impl From<&str> for SeedEntry {
    fn from(url: &str) -> Self {
        Self {
            url: url.to_string(),
            priority: 0,
        }
    }
}

/// How records and links are pulled out of a fetched page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractConfig {
    /// CSS selector for repeated items; absent means one record per page
    #[serde(default)]
    pub item: Option<String>,

    /// CSS selector for links to follow
    #[serde(default = "default_follow")]
    pub follow: String,

    #[serde(default, rename = "field")]
    pub fields: Vec<FieldRule>,
}

fn default_follow() -> String {
    "a[href]".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            item: None,
            follow: default_follow(),
            fields: Vec::new(),
        }
    }
}

/// One extracted field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    pub name: String,

    /// Selector relative to the item (or document); absent means the item itself
    #[serde(default)]
    pub selector: Option<String>,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Falls back to the element text when `attribute` is missing
    #[serde(default, rename = "text-fallback")]
    pub text_fallback: bool,

    /// Regex applied to the raw value; the first capture group (or whole match) is kept
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub kind: FieldKind,

    /// Items missing this field are skipped
    #[serde(default)]
    pub required: bool,
}

/// Value conversion applied to an extracted field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Whitespace-collapsed text
    #[default]
    Text,
    /// Resolved against the page URL
    Url,
    /// First run of digits (commas ignored) as an integer
    Number,
}
