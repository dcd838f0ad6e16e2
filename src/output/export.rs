//! Timestamped exports of the current repository state

use crate::output::OutputResult;
use crate::storage::{BatchStore, RepositorySnapshot};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Files written by one [`export_all`] call
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub csv: PathBuf,
    pub top_json: PathBuf,
}

/// Writes every repository, most starred first, as CSV
///
/// The file is named `repositories_<timestamp>.csv` inside `dir`.
pub fn export_csv(store: &BatchStore, dir: &Path, at: DateTime<Utc>) -> OutputResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("repositories_{}.csv", file_stamp(at)));

    let snapshots = store.latest_snapshots(None)?;
    let mut writer = csv::Writer::from_path(&path)?;
    for snapshot in &snapshots {
        writer.serialize(snapshot)?;
    }
    writer.flush()?;

    tracing::info!("Exported {} repositories to {}", snapshots.len(), path.display());
    Ok(path)
}

/// Writes the `limit` most starred repositories as a JSON array
///
/// The file is named `top_<limit>_repositories_<timestamp>.json` inside `dir`.
pub fn export_top_json(
    store: &BatchStore,
    dir: &Path,
    limit: usize,
    at: DateTime<Utc>,
) -> OutputResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("top_{}_repositories_{}.json", limit, file_stamp(at)));

    let snapshots: Vec<RepositorySnapshot> = store.latest_snapshots(Some(limit))?;
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, &snapshots)?;

    tracing::info!("Exported top {} repositories to {}", snapshots.len(), path.display());
    Ok(path)
}

/// Writes both exports with a shared timestamp
pub fn export_all(store: &BatchStore, dir: &Path, top_n: usize) -> OutputResult<ExportPaths> {
    let at = Utc::now();
    Ok(ExportPaths {
        csv: export_csv(store, dir, at)?,
        top_json: export_top_json(store, dir, top_n, at)?,
    })
}

fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
