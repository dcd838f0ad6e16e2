//! GitHub GraphQL search client
//!
//! # Retry Logic
//!
//! | Condition | Action |
//! |-----------|--------|
//! | HTTP 200, no `errors` | Decode page |
//! | HTTP 200 with `errors` | Immediate → Protocol error |
//! | HTTP 403 / 429 | Wait for rate-limit reset, retry without using an attempt |
//! | HTTP 5xx | Backoff, retry up to `max_attempts` |
//! | Timeout / connection error | Backoff, retry up to `max_attempts` |
//! | Other status | Immediate → Status error |

use crate::client::response::decode_page;
use crate::client::{FetchError, FetchResult, PageRequest, PageSource, RateLimiter};
use crate::config::ApiConfig;
use crate::record::{Cursor, Page};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Search query issued for every page
pub const SEARCH_QUERY: &str = r#"
query($query: String!, $cursor: String, $perPage: Int!) {
  search(query: $query, type: REPOSITORY, first: $perPage, after: $cursor) {
    pageInfo {
      hasNextPage
      endCursor
    }
    nodes {
      ... on Repository {
        databaseId
        owner { login }
        name
        nameWithOwner
        stargazerCount
        createdAt
        updatedAt
      }
    }
  }
}
"#;

/// Attempt ceiling and backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given zero-based attempt: `base * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Rate-limit aware client for the GitHub GraphQL API
pub struct GitHubClient {
    client: Client,
    endpoint: String,
    token: String,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Builds a client from the API configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The API configuration (endpoint, timeouts, retry policy)
    /// * `token` - The resolved API token
    /// * `rate_limiter` - Quota tracker shared with any other client instance
    pub fn new(
        config: &ApiConfig,
        token: String,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token,
            rate_limiter,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.backoff_base_ms),
            },
        })
    }

    /// Replaces the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Fetches one page of the given search query
    pub async fn fetch_search_page(
        &self,
        query: &str,
        cursor: Option<&Cursor>,
        page_size: u32,
    ) -> FetchResult<Page> {
        let payload = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "query": query,
                "cursor": cursor.map(Cursor::as_str),
                "perPage": page_size,
            }
        });

        let body = self.execute_with_retry(&payload).await?;
        decode_page(&body)
    }

    /// Posts the payload until it yields a 200 body or the policy gives up
    async fn execute_with_retry(&self, payload: &serde_json::Value) -> FetchResult<String> {
        let mut attempt = 0;
        let mut last_error = String::from("no attempt made");

        while attempt < self.retry.max_attempts {
            self.rate_limiter.acquire().await;

            let sent = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.token)
                .json(payload)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_builder() => return Err(FetchError::Transport(e)),
                Err(e) => {
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
            };

            self.rate_limiter
                .update_from_headers(response.headers())
                .await;

            let status = response.status();

            if status == StatusCode::OK {
                match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) => {
                        tracing::warn!("Failed to read response body: {}", e);
                        last_error = e.to_string();
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                }
            }

            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.wait_for_reset().await;
                continue;
            }

            if status.is_server_error() {
                tracing::warn!(
                    "Server error {} (attempt {}/{})",
                    status,
                    attempt + 1,
                    self.retry.max_attempts
                );
                last_error = format!("HTTP {}", status);
                self.backoff(attempt).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Err(FetchError::MaxRetriesExceeded { last: last_error })
    }

    /// Sleeps before the next attempt; the final attempt does not sleep
    async fn backoff(&self, attempt: u32) {
        if attempt + 1 < self.retry.max_attempts {
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
        }
    }
}

#[async_trait]
impl PageSource for GitHubClient {
    async fn fetch_page(&self, request: &PageRequest, page_size: u32) -> FetchResult<Page> {
        let page = self
            .fetch_search_page(&request.query, request.cursor.as_ref(), page_size)
            .await?;

        tracing::debug!(
            "Partition {} at {}: {} records, more: {}",
            request.partition,
            request.position(),
            page.len(),
            page.has_next()
        );

        Ok(page)
    }
}
