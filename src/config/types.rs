use serde::Deserialize;

/// Default GitHub GraphQL endpoint
pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Default search partition
pub const DEFAULT_SEARCH_QUERY: &str = "stars:>1 sort:stars-desc";

/// Main configuration structure for Star-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawl pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of fetches outstanding at once
    pub workers: u32,

    /// Stop issuing fetches once this many records have been collected
    pub target_count: u64,

    /// Items requested per fetch
    pub page_size: u32,

    /// Buffered records that trigger a flush to storage
    pub batch_size: usize,

    /// Capacity of the write queue, in pages
    pub queue_capacity: usize,

    /// Search queries; each one seeds its own cursor chain
    pub queries: Vec<String>,

    /// What to do with a page whose fetch failed
    pub on_page_failure: PageFailurePolicy,

    /// Re-issues allowed per page under the `retry` policy
    pub page_retries: u32,

    /// Whether owner/name are updated when a known repository reports new ones
    pub rename_policy: RenamePolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            target_count: 100_000,
            page_size: 100,
            batch_size: 500,
            queue_capacity: 1000,
            queries: vec![DEFAULT_SEARCH_QUERY.to_string()],
            on_page_failure: PageFailurePolicy::Abandon,
            page_retries: 2,
            rename_policy: RenamePolicy::Preserve,
        }
    }
}

/// Behavior when a page fetch fails after the client gave up on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFailurePolicy {
    /// Log and stop that cursor chain
    Abandon,
    /// Re-issue the same cursor up to `page-retries` times, then abandon
    Retry,
    /// Stop issuing fetches and fail the crawl
    Abort,
}

/// Conflict handling for owner/name on an existing repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenamePolicy {
    /// Keep owner/name from the first insert
    Preserve,
    /// Take owner/name from the latest fetch
    Overwrite,
}

/// GitHub API access configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ApiConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,

    /// API token; falls back to the `token-env` environment variable
    pub token: Option<String>,

    /// Environment variable holding the API token
    pub token_env: String,

    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per request for transient failures
    pub max_attempts: u32,

    /// Base of the exponential backoff, in milliseconds
    pub backoff_base_ms: u64,

    /// Remaining quota below which requests wait for the reset
    pub safety_floor: u32,

    /// Extra wait added after the reported reset time, in seconds
    pub reset_grace_secs: u64,

    /// Wait applied on a rate-limit rejection with no known reset, in seconds
    pub rate_limit_fallback_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: GITHUB_GRAPHQL_URL.to_string(),
            token: None,
            token_env: "GITHUB_TOKEN".to_string(),
            user_agent: format!("star-harvest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 1000,
            safety_floor: 50,
            reset_grace_secs: 1,
            rate_limit_fallback_secs: 60,
        }
    }
}

/// Storage and export configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub database_path: String,

    /// Connections kept in the storage pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Directory receiving CSV and JSON exports
    #[serde(default = "default_export_dir")]
    pub export_dir: String,

    /// Rows in the top-N JSON export
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            pool_size: default_pool_size(),
            export_dir: default_export_dir(),
            top_n: default_top_n(),
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_export_dir() -> String {
    "exports".to_string()
}

fn default_top_n() -> usize {
    1000
}
