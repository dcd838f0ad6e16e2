//! Background writer draining the write queue into storage
//!
//! Exactly one writer runs per crawl, so the store never sees concurrent
//! batches from the pipeline. The stream ends when every sender is dropped.

use crate::record::Record;
use crate::storage::{RecordStore, StorageResult};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

/// Starts the writer on the blocking pool
///
/// The handle resolves to the number of records flushed. On a storage error
/// the writer stops and drops its receiver, which makes further sends fail.
pub fn spawn_writer(
    rx: Receiver<Vec<Record>>,
    store: Arc<dyn RecordStore>,
    flush_threshold: usize,
) -> JoinHandle<StorageResult<u64>> {
    tokio::task::spawn_blocking(move || run_writer(rx, store.as_ref(), flush_threshold))
}

fn run_writer(
    mut rx: Receiver<Vec<Record>>,
    store: &dyn RecordStore,
    flush_threshold: usize,
) -> StorageResult<u64> {
    let flush_threshold = flush_threshold.max(1);
    let mut buffer: Vec<Record> = Vec::with_capacity(flush_threshold);
    let mut written = 0u64;

    while let Some(page) = rx.blocking_recv() {
        buffer.extend(page);
        if buffer.len() >= flush_threshold {
            written += flush(store, &mut buffer)?;
        }
    }

    if !buffer.is_empty() {
        written += flush(store, &mut buffer)?;
    }

    tracing::debug!("Writer finished after {} records", written);
    Ok(written)
}

fn flush(store: &dyn RecordStore, buffer: &mut Vec<Record>) -> StorageResult<u64> {
    match store.upsert_batch(buffer) {
        Ok(count) => {
            tracing::debug!("Flushed {} records", count);
            buffer.clear();
            Ok(count as u64)
        }
        Err(e) => {
            tracing::error!("Failed to flush {} records: {}", buffer.len(), e);
            Err(e)
        }
    }
}
