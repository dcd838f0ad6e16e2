//! Configuration module for Star-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, plus resolving the values that may come from the environment
//! (API token, database path).
//!
//! # Example
//!
//! ```no_run
//! use star_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawler will use {} workers", config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, Config, CrawlerConfig, OutputConfig, PageFailurePolicy, RenamePolicy,
    DEFAULT_SEARCH_QUERY, GITHUB_GRAPHQL_URL,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, resolve_token,
    resolve_token_with, DATABASE_PATH_ENV,
};
pub use validation::validate;
