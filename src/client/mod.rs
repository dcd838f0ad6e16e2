//! Client for the paginated repository search API
//!
//! This module contains everything between the crawl pipeline and the wire:
//! - The [`PageSource`] seam the pipeline fetches through
//! - The shared [`RateLimiter`] tracking remaining quota and reset time
//! - The GraphQL client with retry and backoff
//! - Typed decoding of search responses

mod graphql;
mod rate_limit;
mod response;

pub use graphql::{GitHubClient, RetryPolicy, SEARCH_QUERY};
pub use rate_limit::{RateLimitSnapshot, RateLimiter, DEFAULT_SAFETY_FLOOR};
pub use response::decode_page;

use crate::record::{Cursor, Page};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can end a page fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The API answered 200 but reported errors in the payload
    #[error("GraphQL errors: {0}")]
    Protocol(String),

    /// The payload could not be decoded into a search result
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// A status that is neither success, rate limiting, nor a server error
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// A transport failure that retrying cannot fix
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("max retries exceeded (last error: {last})")]
    MaxRetriesExceeded { last: String },

    /// The fetch task panicked or was cancelled
    #[error("Fetch task failed: {0}")]
    TaskFailed(String),
}

impl FetchError {
    /// Whether the page could succeed if fetched again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// One page to fetch: a search partition plus a position in its results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Index of the search partition this request belongs to
    pub partition: usize,

    /// Search query of that partition
    pub query: Arc<str>,

    /// Position in the result stream; `None` is the start
    pub cursor: Option<Cursor>,
}

impl PageRequest {
    /// Request for the first page of a partition
    pub fn first(partition: usize, query: Arc<str>) -> Self {
        Self {
            partition,
            query,
            cursor: None,
        }
    }

    /// Request for the page following this one
    pub fn successor(&self, cursor: Cursor) -> Self {
        Self {
            partition: self.partition,
            query: Arc::clone(&self.query),
            cursor: Some(cursor),
        }
    }

    /// Cursor rendered for logs
    pub fn position(&self) -> &str {
        self.cursor.as_ref().map(Cursor::as_str).unwrap_or("<start>")
    }
}

/// Anything the crawl pipeline can fetch pages from
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches up to `page_size` records at the request's position
    async fn fetch_page(&self, request: &PageRequest, page_size: u32) -> FetchResult<Page>;
}
