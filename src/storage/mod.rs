//! Storage module for persisting harvested records
//!
//! This module handles all database operations, including:
//! - SQLite schema management
//! - An r2d2 connection pool
//! - Atomic batch upserts of repository state and star observations
//! - Crawl run tracking
//! - Read queries backing the reports

mod pool;
mod schema;
mod sqlite;
mod traits;

pub use pool::{ConnectionPool, PooledConnection, DEFAULT_CHECKOUT_TIMEOUT};
pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::BatchStore;
pub use traits::{RecordStore, StorageError, StorageResult};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Formats a timestamp the way every column of the schema stores it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current state of one repository as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRow {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_crawled_at: String,
}

/// One point of a repository's star count time series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarObservation {
    pub repository_id: i64,
    pub star_count: i64,
    pub observed_at: String,
}

/// A repository joined with its latest star observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositorySnapshot {
    pub id: i64,
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub star_count: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_star_count_at: String,
}

/// Aggregates over the latest star count of every repository
#[derive(Debug, Clone, PartialEq)]
pub struct StarTotals {
    pub total_repositories: i64,
    pub total_stars: i64,
    pub average_stars: f64,
    pub max_stars: i64,
    pub min_stars: i64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub records_written: Option<i64>,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
