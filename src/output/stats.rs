//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! aggregate star statistics from the storage layer.

use crate::output::OutputResult;
use crate::storage::{BatchStore, RunRecord, StarTotals};

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestSummary {
    /// Aggregates over the latest star count of every repository
    pub totals: StarTotals,

    /// Most recent crawl run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
///
/// # Returns
///
/// * `Ok(HarvestSummary)` - Successfully loaded statistics
/// * `Err(OutputError)` - Failed to query statistics
pub fn load_summary(store: &BatchStore) -> OutputResult<HarvestSummary> {
    Ok(HarvestSummary {
        totals: store.star_totals()?,
        latest_run: store.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_summary(summary: &HarvestSummary) {
    let totals = &summary.totals;

    println!("=== Harvest Statistics ===\n");

    println!("Repositories:");
    println!("  Total repositories: {}", totals.total_repositories);
    println!("  Total stars: {}", totals.total_stars);
    println!("  Average stars: {:.2}", totals.average_stars);
    println!("  Max stars: {}", totals.max_stars);
    println!("  Min stars: {}", totals.min_stars);
    println!();

    match &summary.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  ID: {}", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            if let Some(written) = run.records_written {
                println!("  Records written: {}", written);
            }
            println!("  Config hash: {}", run.config_hash);
        }
        None => println!("No crawl runs recorded"),
    }
}
