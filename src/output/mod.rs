//! Output module for reports over harvested data
//!
//! This module handles:
//! - Aggregate star statistics printed to the terminal
//! - Timestamped CSV export of every repository
//! - Timestamped JSON export of the most starred repositories

mod export;
pub mod stats;

pub use export::{export_all, export_csv, export_top_json, ExportPaths};
pub use stats::{load_summary, print_summary, HarvestSummary};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while producing reports
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
