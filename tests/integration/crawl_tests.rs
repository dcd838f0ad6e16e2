//! Crawl pipeline tests
//!
//! A fake page source serves deterministic cursor chains so fetch counts,
//! concurrency and backpressure can be observed exactly.

use crate::support::{api_config, node, search_body};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use star_harvest::client::{FetchError, FetchResult, PageRequest, PageSource};
use star_harvest::config::{Config, CrawlerConfig, OutputConfig, PageFailurePolicy};
use star_harvest::crawler::{run_crawl, CrawlError, CrawlPipeline};
use star_harvest::storage::{BatchStore, RecordStore, RunStatus, StorageError, StorageResult};
use star_harvest::{Cursor, HarvestError, Page, Record};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Copy)]
enum Failure {
    Transient,
    Protocol,
    Panic,
}

/// Serves `pages` pages per partition with cursors `p<partition>-<n>`
struct FakeSource {
    pages: usize,
    delay: Duration,
    failures: Mutex<HashMap<(usize, usize), (Failure, u32)>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            delay: Duration::from_millis(1),
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails page `index` of `partition` the next `times` fetches
    fn failing(self, partition: usize, index: usize, failure: Failure, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((partition, index), (failure, times));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn page_index(request: &PageRequest) -> usize {
        request
            .cursor
            .as_ref()
            .and_then(|c| c.as_str().rsplit('-').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    fn take_failure(&self, key: (usize, usize)) -> Option<Failure> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&key) {
            Some((failure, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*failure)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch_page(&self, request: &PageRequest, page_size: u32) -> FetchResult<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let index = Self::page_index(request);
        match self.take_failure((request.partition, index)) {
            Some(Failure::Transient) => {
                return Err(FetchError::MaxRetriesExceeded {
                    last: "HTTP 502".to_string(),
                })
            }
            Some(Failure::Protocol) => return Err(FetchError::Protocol("bad query".to_string())),
            Some(Failure::Panic) => panic!("source crashed on page {}", index),
            None => {}
        }

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let base = (request.partition * 1_000_000 + index * page_size as usize) as i64;
        let records = (0..page_size as i64)
            .map(|i| {
                let id = base + i;
                Record::new(id, "fake", format!("r{}", id), format!("fake/r{}", id), 1, at, at)
            })
            .collect();

        let next_cursor = (index + 1 < self.pages)
            .then(|| Cursor::new(format!("p{}-{}", request.partition, index + 1)));

        Ok(Page {
            records,
            next_cursor,
        })
    }
}

/// Store whose writes block until the gate opens
struct GatedStore {
    inner: BatchStore,
    open: Mutex<bool>,
    opened: Condvar,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: BatchStore::open_in_memory().unwrap(),
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    fn open_gate(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl RecordStore for GatedStore {
    fn upsert_batch(&self, records: &[Record]) -> StorageResult<usize> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        self.inner.upsert_batch(records)
    }

    fn count(&self) -> StorageResult<i64> {
        self.inner.count()
    }
}

struct FailingStore;

impl RecordStore for FailingStore {
    fn upsert_batch(&self, _records: &[Record]) -> StorageResult<usize> {
        Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            Some("disk I/O error".to_string()),
        )))
    }

    fn count(&self) -> StorageResult<i64> {
        Ok(0)
    }
}

fn crawler_config(partitions: usize) -> CrawlerConfig {
    CrawlerConfig {
        workers: 10,
        target_count: 1_000_000,
        page_size: 10,
        batch_size: 25,
        queue_capacity: 16,
        queries: (0..partitions).map(|p| format!("stars:>{}", p)).collect(),
        ..CrawlerConfig::default()
    }
}

#[tokio::test]
async fn test_target_stops_issuing_fetches() {
    let source = Arc::new(FakeSource::new(10));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        target_count: 250,
        page_size: 100,
        batch_size: 500,
        ..crawler_config(1)
    };

    let report = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(source.calls(), 3);
    assert_eq!(report.fetches_issued, 3);
    let stored = store.count().unwrap();
    assert!((250..=300).contains(&stored), "stored {}", stored);
    assert_eq!(report.records_written, 300);
}

#[tokio::test]
async fn test_outstanding_fetches_drain_after_target() {
    let source = Arc::new(FakeSource::new(3).with_delay(Duration::from_millis(20)));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        workers: 4,
        target_count: 15,
        ..crawler_config(4)
    };

    let report = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    // four seeds, one successor issued before the second page met the target
    assert_eq!(source.calls(), 5);
    assert_eq!(report.records_fetched, 50);
    assert_eq!(report.records_written, 50);
    assert_eq!(store.count().unwrap(), 50);
}

#[tokio::test]
async fn test_chain_ends_without_next_cursor() {
    let source = Arc::new(FakeSource::new(2));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());

    let report = CrawlPipeline::new(crawler_config(3), source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(source.calls(), 6);
    assert_eq!(report.records_fetched, 60);
    assert_eq!(store.count().unwrap(), 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outstanding_fetches_never_exceed_workers() {
    let source = Arc::new(FakeSource::new(3).with_delay(Duration::from_millis(20)));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        workers: 3,
        ..crawler_config(8)
    };

    CrawlPipeline::new(config, source.clone(), store)
        .run()
        .await
        .unwrap();

    assert_eq!(source.calls(), 24);
    let max = source.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "{} fetches outstanding", max);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_writer_stalls_fetching() {
    let source = Arc::new(FakeSource::new(20));
    let store = Arc::new(GatedStore::new());
    let config = CrawlerConfig {
        workers: 1,
        page_size: 1,
        batch_size: 1,
        queue_capacity: 2,
        ..crawler_config(1)
    };

    let pipeline = CrawlPipeline::new(config, source.clone(), store.clone());
    let crawl = tokio::spawn(async move { pipeline.run().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stalled_at = source.calls();
    // one page held by the writer, two queued, one waiting to be queued
    assert!(stalled_at <= 4, "{} fetches while stalled", stalled_at);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), stalled_at);

    store.open_gate();
    let report = crawl.await.unwrap().unwrap();

    assert_eq!(source.calls(), 20);
    assert_eq!(report.records_written, 20);
}

#[tokio::test]
async fn test_writer_failure_fails_the_crawl() {
    let source = Arc::new(FakeSource::new(50).with_delay(Duration::from_millis(5)));
    let config = CrawlerConfig {
        batch_size: 10,
        queue_capacity: 1,
        ..crawler_config(1)
    };

    let result = CrawlPipeline::new(config, source.clone(), Arc::new(FailingStore))
        .run()
        .await;

    assert!(matches!(result, Err(CrawlError::Writer(_))));
    assert!(source.calls() < 50);
}

#[tokio::test]
async fn test_abandon_policy_stops_only_that_chain() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Transient, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());

    let report = CrawlPipeline::new(crawler_config(2), source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages_failed, 1);
    assert_eq!(source.calls(), 5);
    assert_eq!(store.count().unwrap(), 40);
}

#[tokio::test]
async fn test_retry_policy_reissues_same_cursor() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Transient, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        on_page_failure: PageFailurePolicy::Retry,
        page_retries: 2,
        ..crawler_config(2)
    };

    let report = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages_failed, 0);
    assert_eq!(source.calls(), 7);
    assert_eq!(store.count().unwrap(), 60);
}

#[tokio::test]
async fn test_retry_policy_gives_up_after_page_retries() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Transient, 10));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        on_page_failure: PageFailurePolicy::Retry,
        page_retries: 2,
        ..crawler_config(2)
    };

    let report = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages_failed, 1);
    // first page, three attempts at the second, then the other partition
    assert_eq!(source.calls(), 7);
    assert_eq!(store.count().unwrap(), 40);
}

#[tokio::test]
async fn test_retry_policy_skips_non_retryable_errors() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Protocol, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        on_page_failure: PageFailurePolicy::Retry,
        ..crawler_config(1)
    };

    let report = CrawlPipeline::new(config, source.clone(), store)
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages_failed, 1);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_abort_policy_fails_the_crawl() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Transient, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        on_page_failure: PageFailurePolicy::Abort,
        ..crawler_config(1)
    };

    let result = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await;

    match result {
        Err(CrawlError::PageFailed {
            partition, cursor, ..
        }) => {
            assert_eq!(partition, 0);
            assert_eq!(cursor, "p0-1");
        }
        other => panic!("expected page failure, got {:?}", other),
    }
    assert_eq!(source.calls(), 2);
    // the first page was still written
    assert_eq!(store.count().unwrap(), 10);
}

#[tokio::test]
async fn test_panicking_fetch_is_abandoned() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Panic, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());

    let report = CrawlPipeline::new(crawler_config(2), source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages_failed, 1);
    assert_eq!(source.calls(), 5);
    assert_eq!(store.count().unwrap(), 40);
}

#[tokio::test]
async fn test_panicking_fetch_aborts_under_abort_policy() {
    let source = Arc::new(FakeSource::new(3).failing(0, 1, Failure::Panic, 1));
    let store = Arc::new(BatchStore::open_in_memory().unwrap());
    let config = CrawlerConfig {
        on_page_failure: PageFailurePolicy::Abort,
        ..crawler_config(1)
    };

    let result = CrawlPipeline::new(config, source.clone(), store.clone())
        .run()
        .await;

    match result {
        Err(CrawlError::PageFailed {
            cursor, source, ..
        }) => {
            assert_eq!(cursor, "p0-1");
            assert!(matches!(source, FetchError::TaskFailed(_)));
        }
        other => panic!("expected page failure, got {:?}", other),
    }
    assert_eq!(store.count().unwrap(), 10);
}

#[tokio::test]
async fn test_run_crawl_end_to_end() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "variables": { "cursor": "c1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(vec![node(3, 5)], None)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(search_body(vec![node(1, 50), node(2, 20)], Some("c1"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let db_path = dir.path().join("harvest.db");
    let config = Config {
        crawler: CrawlerConfig {
            page_size: 2,
            ..crawler_config(1)
        },
        api: api_config(&server.uri()),
        output: OutputConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            pool_size: 2,
            export_dir: dir.path().join("exports").to_string_lossy().into_owned(),
            top_n: 10,
        },
    };

    let report = run_crawl(&config, "test-hash").await.unwrap();

    assert_eq!(report.records_fetched, 3);
    assert_eq!(report.records_written, 3);

    let store = BatchStore::open(&db_path, 1).unwrap();
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(store.star_totals().unwrap().max_stars, 50);

    let run = store.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_written, Some(3));
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_run_crawl_marks_run_failed_on_writer_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");

    {
        let store = BatchStore::open(&db_path, 1).unwrap();
        let conn = store.pool().get().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_observations BEFORE INSERT ON repository_stars
             BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
        )
        .unwrap();
    }

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(search_body(vec![node(1, 50), node(2, 20)], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        crawler: crawler_config(1),
        api: api_config(&server.uri()),
        output: OutputConfig {
            database_path: db_path.to_string_lossy().into_owned(),
            pool_size: 2,
            ..OutputConfig::default()
        },
    };

    let result = run_crawl(&config, "failing-hash").await;
    assert!(matches!(
        result,
        Err(HarvestError::Crawl(CrawlError::Writer(_)))
    ));

    let store = BatchStore::open(&db_path, 1).unwrap();
    assert_eq!(store.count().unwrap(), 0);

    let run = store.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.config_hash, "failing-hash");
    assert!(run.finished_at.is_some());
    assert_eq!(run.records_written, None);
}
