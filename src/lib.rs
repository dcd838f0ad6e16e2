//! Star-Harvest: a rate-limit aware repository metadata harvester
//!
//! This crate pages through the GitHub GraphQL search API, turning each result
//! into an immutable [`Record`], and persists the records into SQLite, keeping
//! both the current state of every repository and a time series of its star
//! counts.

pub mod client;
pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod storage;

use thiserror::Error;

/// Main error type for Star-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] client::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] crawler::CrawlError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing credential: set api.token or the {0} environment variable")]
    MissingCredential(String),
}

/// Result type alias for Star-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use client::{GitHubClient, PageSource, RateLimiter};
pub use config::Config;
pub use crawler::{CrawlPipeline, CrawlReport};
pub use record::{Cursor, Page, Record};
pub use storage::{BatchStore, RecordStore};
