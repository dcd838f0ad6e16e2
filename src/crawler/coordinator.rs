//! Crawl pipeline - fetch orchestration
//!
//! The pipeline keeps at most `workers` page fetches outstanding, chains each
//! successful page to its successor cursor, and pushes every page of records
//! onto a bounded write queue drained by the background writer. A full queue
//! stalls the orchestrator, which in turn stops new fetches from being issued.

use crate::client::{FetchError, FetchResult, PageRequest, PageSource};
use crate::config::{CrawlerConfig, PageFailurePolicy};
use crate::crawler::writer::spawn_writer;
use crate::crawler::CrawlError;
use crate::record::Page;
use crate::storage::RecordStore;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Records between two progress reports
const PROGRESS_INTERVAL: u64 = 1000;

/// Lifecycle of one crawl invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    /// No fetch issued yet
    Seeding,
    /// Fetches outstanding and successors still being issued
    Running,
    /// No more fetches will be issued; waiting on the outstanding ones
    Draining,
    Done,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seeding => "seeding",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of a finished crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// Records received from successful fetches and queued for the writer
    pub records_fetched: u64,
    /// Records the writer flushed to storage
    pub records_written: u64,
    /// Fetches started, including re-issued ones
    pub fetches_issued: u64,
    /// Pages given up on
    pub pages_failed: u64,
    pub elapsed: Duration,
}

/// A fetch waiting for a free worker slot
struct PendingFetch {
    request: PageRequest,
    attempt: u32,
}

/// Outcome of one spawned fetch
struct Completed {
    pending: PendingFetch,
    result: FetchResult<Page>,
}

/// What became of a failed page
enum FailureOutcome {
    Requeued,
    Abandoned,
    Fatal(CrawlError),
}

/// Bounded-concurrency page fetcher feeding a single background writer
pub struct CrawlPipeline {
    config: CrawlerConfig,
    source: Arc<dyn PageSource>,
    store: Arc<dyn RecordStore>,
}

impl CrawlPipeline {
    /// Creates a pipeline over a page source and a record store
    ///
    /// Every entry of `config.queries` seeds its own cursor chain.
    pub fn new(
        config: CrawlerConfig,
        source: Arc<dyn PageSource>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    /// Runs the crawl to its target or until every cursor chain ends
    ///
    /// A writer failure stops the crawl and is returned in preference to any
    /// page failure. Under the `abort` policy the first failed page stops the
    /// crawl; outstanding fetches are still drained and their records written.
    pub async fn run(&self) -> Result<CrawlReport, CrawlError> {
        let start = Instant::now();
        let workers = self.config.workers.max(1) as usize;
        let target = self.config.target_count;

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let writer = spawn_writer(rx, Arc::clone(&self.store), self.config.batch_size);

        let mut ready: VecDeque<PendingFetch> = self
            .config
            .queries
            .iter()
            .enumerate()
            .map(|(partition, query)| PendingFetch {
                request: PageRequest::first(partition, Arc::from(query.as_str())),
                attempt: 0,
            })
            .collect();

        let mut phase = CrawlPhase::Seeding;
        tracing::info!(
            "Crawl {}: {} partition(s), {} workers, target {} records",
            phase,
            ready.len(),
            workers,
            target
        );

        let mut fetches: JoinSet<Completed> = JoinSet::new();
        let mut collected = 0u64;
        let mut fetches_issued = 0u64;
        let mut pages_failed = 0u64;
        let mut writer_closed = false;
        let mut fatal: Option<CrawlError> = None;

        loop {
            let stopping = writer_closed || fatal.is_some() || collected >= target;

            if !stopping {
                while fetches.len() < workers {
                    let Some(pending) = ready.pop_front() else {
                        break;
                    };
                    fetches_issued += 1;
                    self.spawn_fetch(&mut fetches, pending);
                }
            }

            let next_phase = if stopping {
                CrawlPhase::Draining
            } else {
                CrawlPhase::Running
            };
            // Draining never reverts to running
            if next_phase != phase && phase != CrawlPhase::Draining {
                tracing::debug!("Crawl phase {} -> {}", phase, next_phase);
                phase = next_phase;
            }

            let Some(joined) = fetches.join_next().await else {
                break;
            };

            let Completed { pending, result } = match joined {
                Ok(completed) => completed,
                // Fetch panics are caught inside the task; this is cancellation
                Err(e) => {
                    tracing::error!("Fetch task failed: {}", e);
                    pages_failed += 1;
                    continue;
                }
            };

            match result {
                Ok(_) if writer_closed => {}
                Ok(page) => {
                    let fetched = page.len() as u64;
                    let Page {
                        records,
                        next_cursor,
                    } = page;

                    if !records.is_empty() && tx.send(records).await.is_err() {
                        tracing::error!("Write queue closed; no further fetches will be issued");
                        writer_closed = true;
                        continue;
                    }

                    let before = collected;
                    collected += fetched;
                    if collected / PROGRESS_INTERVAL > before / PROGRESS_INTERVAL {
                        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
                        let rate = collected as f64 / elapsed;
                        tracing::info!(
                            "Progress: {} records collected, {} fetches outstanding, {:.1} records/sec",
                            collected,
                            fetches.len(),
                            rate
                        );
                    }

                    let accepting = !writer_closed && fatal.is_none() && collected < target;
                    match next_cursor {
                        Some(cursor) if accepting => ready.push_back(PendingFetch {
                            request: pending.request.successor(cursor),
                            attempt: 0,
                        }),
                        Some(_) => {}
                        None => tracing::debug!(
                            "Partition {} exhausted after cursor {}",
                            pending.request.partition,
                            pending.request.position()
                        ),
                    }
                }
                Err(error) => match self.handle_failure(pending, error, &mut ready) {
                    FailureOutcome::Requeued => {}
                    FailureOutcome::Abandoned => pages_failed += 1,
                    FailureOutcome::Fatal(err) => {
                        pages_failed += 1;
                        fatal.get_or_insert(err);
                    }
                },
            }
        }

        phase = CrawlPhase::Done;
        drop(tx);

        let records_written = writer
            .await
            .map_err(|e| CrawlError::WriterPanicked(e.to_string()))?
            .map_err(CrawlError::Writer)?;

        if let Some(err) = fatal {
            return Err(err);
        }

        let report = CrawlReport {
            records_fetched: collected,
            records_written,
            fetches_issued,
            pages_failed,
            elapsed: start.elapsed(),
        };

        tracing::info!(
            "Crawl {}: {} records fetched, {} written, {} fetches, {} pages failed in {:?}",
            phase,
            report.records_fetched,
            report.records_written,
            report.fetches_issued,
            report.pages_failed,
            report.elapsed
        );

        Ok(report)
    }

    fn spawn_fetch(&self, fetches: &mut JoinSet<Completed>, pending: PendingFetch) {
        let source = Arc::clone(&self.source);
        let page_size = self.config.page_size;

        tracing::debug!(
            "Fetching partition {} at {} (attempt {})",
            pending.request.partition,
            pending.request.position(),
            pending.attempt + 1
        );

        // The inner task keeps a panicking source from losing the request
        let request = pending.request.clone();
        let fetch = async move { source.fetch_page(&request, page_size).await };

        fetches.spawn(async move {
            let result = match tokio::spawn(fetch).await {
                Ok(result) => result,
                Err(e) => Err(FetchError::TaskFailed(e.to_string())),
            };
            Completed { pending, result }
        });
    }

    /// Applies the page failure policy
    fn handle_failure(
        &self,
        pending: PendingFetch,
        error: FetchError,
        ready: &mut VecDeque<PendingFetch>,
    ) -> FailureOutcome {
        let partition = pending.request.partition;
        let cursor = pending.request.position().to_string();

        match self.config.on_page_failure {
            PageFailurePolicy::Retry
                if error.is_retryable() && pending.attempt < self.config.page_retries =>
            {
                tracing::warn!(
                    "Page at {} of partition {} failed ({}); re-queueing",
                    cursor,
                    partition,
                    error
                );
                ready.push_back(PendingFetch {
                    request: pending.request,
                    attempt: pending.attempt + 1,
                });
                FailureOutcome::Requeued
            }
            PageFailurePolicy::Abort => {
                tracing::error!(
                    "Page at {} of partition {} failed ({}); stopping crawl",
                    cursor,
                    partition,
                    error
                );
                FailureOutcome::Fatal(CrawlError::PageFailed {
                    partition,
                    cursor,
                    source: error,
                })
            }
            PageFailurePolicy::Abandon | PageFailurePolicy::Retry => {
                tracing::warn!(
                    "Abandoning partition {} at {}: {}",
                    partition,
                    cursor,
                    error
                );
                FailureOutcome::Abandoned
            }
        }
    }
}
