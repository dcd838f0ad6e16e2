//! Storage traits and error types
//!
//! This module defines the interface the background writer persists through
//! and the errors storage operations return.

use crate::record::Record;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Sink for harvested records
///
/// Implementations must be safe to share across threads; the crawl pipeline
/// itself only ever calls them from its single writer thread.
pub trait RecordStore: Send + Sync {
    /// Persists a batch atomically and returns the number of records written
    ///
    /// On error nothing from the batch is visible.
    fn upsert_batch(&self, records: &[Record]) -> StorageResult<usize>;

    /// Total number of repositories stored
    fn count(&self) -> StorageResult<i64>;
}
