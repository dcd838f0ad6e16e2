//! Star-Harvest main entry point
//!
//! This is the command-line interface for the Star-Harvest repository harvester.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use star_harvest::config::{load_config_with_hash, resolve_token, Config};
use star_harvest::crawler::run_crawl;
use star_harvest::output::{export_all, load_summary, print_summary};
use star_harvest::storage::BatchStore;
use tracing_subscriber::EnvFilter;

/// Star-Harvest: a rate-limit aware repository metadata harvester
///
/// Star-Harvest pages through the GitHub search API under a bounded worker
/// budget and stores every repository's current state along with a time
/// series of its star counts.
#[derive(Parser, Debug)]
#[command(name = "star-harvest")]
#[command(version)]
#[command(about = "A rate-limit aware repository metadata harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write CSV and top-N JSON exports from existing data and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.export {
        handle_export(&config)
    } else {
        handle_crawl(&config, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("star_harvest=info,warn"),
            1 => EnvFilter::new("star_harvest=debug,info"),
            2 => EnvFilter::new("star_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Star-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Target records: {}", config.crawler.target_count);
    println!("  Page size: {}", config.crawler.page_size);
    println!("  Flush threshold: {}", config.crawler.batch_size);
    println!("  Queue capacity: {} pages", config.crawler.queue_capacity);
    println!("  On page failure: {:?}", config.crawler.on_page_failure);
    println!("  Rename policy: {:?}", config.crawler.rename_policy);

    println!("\nAPI:");
    println!("  Endpoint: {}", config.api.endpoint);
    println!("  User agent: {}", config.api.user_agent);
    println!("  Max attempts: {}", config.api.max_attempts);
    println!("  Safety floor: {}", config.api.safety_floor);
    let credential = match resolve_token(&config.api) {
        Ok(_) => "present".to_string(),
        Err(e) => format!("MISSING ({})", e),
    };
    println!("  Credential: {}", credential);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Pool size: {}", config.output.pool_size);
    println!("  Export directory: {}", config.output.export_dir);

    println!("\nSearch Partitions ({}):", config.crawler.queries.len());
    for query in &config.crawler.queries {
        println!("  - {}", query);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(config)?;
    let summary = load_summary(&store)?;
    print_summary(&summary);

    Ok(())
}

/// Handles the --export mode: writes timestamped CSV and JSON exports
fn handle_export(config: &Config) -> anyhow::Result<()> {
    println!("=== Exporting Repositories ===\n");
    println!("Database: {}", config.output.database_path);
    println!("Output: {}", config.output.export_dir);
    println!();

    let store = open_store(config)?;
    let paths = export_all(
        &store,
        Path::new(&config.output.export_dir),
        config.output.top_n,
    )?;

    println!("✓ Full export written to: {}", paths.csv.display());
    println!("✓ Top {} written to: {}", config.output.top_n, paths.top_json.display());

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Search partitions: {}, workers: {}, target: {}",
        config.crawler.queries.len(),
        config.crawler.workers,
        config.crawler.target_count
    );

    let report = run_crawl(config, config_hash).await.context("crawl failed")?;

    tracing::info!(
        "Crawl completed: {} records written ({} pages failed)",
        report.records_written,
        report.pages_failed
    );

    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<BatchStore> {
    let path = Path::new(&config.output.database_path);
    BatchStore::open(path, config.output.pool_size)
        .with_context(|| format!("failed to open database {}", path.display()))
}
