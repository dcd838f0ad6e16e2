//! Crawler module for paginated repository harvesting
//!
//! This module contains the core crawling logic, including:
//! - Bounded-concurrency page fetching along cursor chains
//! - The bounded write queue and its single background writer
//! - Overall crawl coordination and run tracking

mod coordinator;
mod writer;

pub use coordinator::{CrawlPhase, CrawlPipeline, CrawlReport};
pub use writer::spawn_writer;

use crate::client::{FetchError, GitHubClient, PageSource, RateLimiter};
use crate::config::{resolve_token, Config};
use crate::storage::{BatchStore, RecordStore, RunStatus, StorageError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that end a crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The background writer failed to persist a batch
    #[error("Writer failed: {0}")]
    Writer(#[source] StorageError),

    /// A page failed under the `abort` failure policy
    #[error("Page at {cursor} of partition {partition} failed: {source}")]
    PageFailed {
        partition: usize,
        cursor: String,
        #[source]
        source: FetchError,
    },

    #[error("Writer task panicked: {0}")]
    WriterPanicked(String),
}

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Resolve the API credential
/// 2. Open the database, creating the schema if needed
/// 3. Record a new crawl run
/// 4. Fetch pages and persist records until the target is met
/// 5. Mark the run completed or failed
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `config_hash` - Hash of the configuration file, stored with the run
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl completed successfully
/// * `Err(HarvestError)` - Crawl failed
pub async fn run_crawl(config: &Config, config_hash: &str) -> crate::Result<CrawlReport> {
    let token = resolve_token(&config.api)?;

    let store = Arc::new(
        BatchStore::open(
            Path::new(&config.output.database_path),
            config.output.pool_size,
        )?
        .with_rename_policy(config.crawler.rename_policy),
    );

    let limiter = Arc::new(RateLimiter::from_config(&config.api));
    let client = GitHubClient::new(&config.api, token, limiter)?;

    let run_id = store.create_run(config_hash)?;
    tracing::info!(
        "Starting crawl run {} ({} repositories already stored)",
        run_id,
        store.count()?
    );

    let pipeline = CrawlPipeline::new(
        config.crawler.clone(),
        Arc::new(client) as Arc<dyn PageSource>,
        Arc::clone(&store) as Arc<dyn RecordStore>,
    );

    match pipeline.run().await {
        Ok(report) => {
            store.finish_run(run_id, RunStatus::Completed, Some(report.records_written))?;
            Ok(report)
        }
        Err(e) => {
            tracing::error!("Crawl run {} failed: {}", run_id, e);
            if let Err(finish_err) = store.finish_run(run_id, RunStatus::Failed, None) {
                tracing::warn!("Could not mark run {} failed: {}", run_id, finish_err);
            }
            Err(e.into())
        }
    }
}
