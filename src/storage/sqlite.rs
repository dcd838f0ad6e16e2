//! SQLite storage implementation
//!
//! [`BatchStore`] writes each batch in one transaction: repositories are
//! upserted by identity, then one star observation per record is inserted at
//! a single `observed_at` instant shared by the whole batch.

use crate::config::RenamePolicy;
use crate::record::Record;
use crate::storage::pool::{self, ConnectionPool};
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, RepositoryRow, RepositorySnapshot, RunRecord, RunStatus, StarObservation,
    StarTotals,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

const UPSERT_REPOSITORY_PRESERVE: &str = "
    INSERT INTO repositories (id, owner, name, full_name, created_at, updated_at, last_crawled_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        updated_at = excluded.updated_at,
        last_crawled_at = excluded.last_crawled_at";

const UPSERT_REPOSITORY_OVERWRITE: &str = "
    INSERT INTO repositories (id, owner, name, full_name, created_at, updated_at, last_crawled_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(id) DO UPDATE SET
        owner = excluded.owner,
        name = excluded.name,
        full_name = excluded.full_name,
        updated_at = excluded.updated_at,
        last_crawled_at = excluded.last_crawled_at";

const INSERT_OBSERVATION: &str = "
    INSERT INTO repository_stars (repository_id, star_count, observed_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(repository_id, observed_at) DO UPDATE SET
        star_count = excluded.star_count";

/// Idempotent batch persistence over a connection pool
pub struct BatchStore {
    pool: ConnectionPool,
    rename_policy: RenamePolicy,
}

impl BatchStore {
    /// Opens (creating if needed) the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `pool_size` - Number of pooled connections
    pub fn open(path: &Path, pool_size: usize) -> StorageResult<Self> {
        Ok(Self::from_pool(pool::open(path, pool_size)?))
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::from_pool(pool::open_in_memory()?))
    }

    pub fn from_pool(pool: ConnectionPool) -> Self {
        Self {
            pool,
            rename_policy: RenamePolicy::Preserve,
        }
    }

    pub fn with_rename_policy(mut self, policy: RenamePolicy) -> Self {
        self.rename_policy = policy;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn rename_policy(&self) -> RenamePolicy {
        self.rename_policy
    }

    /// Upserts a batch with every observation stamped `observed_at`
    ///
    /// The whole batch commits or nothing does. Within one call a repeated
    /// identity collapses to one observation holding the last star count.
    pub fn upsert_batch_at(
        &self,
        records: &[Record],
        observed_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let observed_at = format_timestamp(observed_at);
        let upsert_repository = match self.rename_policy {
            RenamePolicy::Preserve => UPSERT_REPOSITORY_PRESERVE,
            RenamePolicy::Overwrite => UPSERT_REPOSITORY_OVERWRITE,
        };

        let mut conn = self.pool.get()?;
        // Dropping an uncommitted transaction rolls it back
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(upsert_repository)?;
            for record in records {
                stmt.execute(params![
                    record.identity(),
                    record.owner(),
                    record.name(),
                    record.qualified_name(),
                    format_timestamp(record.created_at()),
                    format_timestamp(record.updated_at()),
                    observed_at,
                ])?;
            }

            let mut stmt = tx.prepare_cached(INSERT_OBSERVATION)?;
            for record in records {
                stmt.execute(params![
                    record.identity(),
                    star_count_column(record.star_count()),
                    observed_at,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Upserted {} records at {}", records.len(), observed_at);
        Ok(records.len())
    }

    /// Gets the stored state of one repository
    pub fn get_repository(&self, id: i64) -> StorageResult<Option<RepositoryRow>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, owner, name, full_name, created_at, updated_at, last_crawled_at
                 FROM repositories WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RepositoryRow {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        name: row.get(2)?,
                        full_name: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                        last_crawled_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Gets the star count time series of one repository, oldest first
    pub fn star_history(&self, id: i64) -> StorageResult<Vec<StarObservation>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT repository_id, star_count, observed_at FROM repository_stars
             WHERE repository_id = ?1 ORDER BY observed_at ASC",
        )?;

        let history = stmt
            .query_map(params![id], |row| {
                Ok(StarObservation {
                    repository_id: row.get(0)?,
                    star_count: row.get(1)?,
                    observed_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(history)
    }

    /// Counts, sums and bounds the latest star count of every repository
    pub fn star_totals(&self) -> StorageResult<StarTotals> {
        let conn = self.pool.get()?;
        let totals = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(star_count), 0),
                    COALESCE(AVG(star_count), 0.0),
                    COALESCE(MAX(star_count), 0),
                    COALESCE(MIN(star_count), 0)
             FROM latest_repository_stars",
            [],
            |row| {
                Ok(StarTotals {
                    total_repositories: row.get(0)?,
                    total_stars: row.get(1)?,
                    average_stars: row.get(2)?,
                    max_stars: row.get(3)?,
                    min_stars: row.get(4)?,
                })
            },
        )?;
        Ok(totals)
    }

    /// Gets repositories with their latest star count, most starred first
    ///
    /// `limit` of `None` returns every repository.
    pub fn latest_snapshots(&self, limit: Option<usize>) -> StorageResult<Vec<RepositorySnapshot>> {
        let limit = limit
            .and_then(|n| i64::try_from(n).ok())
            .unwrap_or(-1);

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.full_name, r.owner, r.name, l.star_count,
                    r.created_at, r.updated_at, l.observed_at
             FROM repositories r
             JOIN latest_repository_stars l ON l.repository_id = r.id
             ORDER BY l.star_count DESC, r.id ASC
             LIMIT ?1",
        )?;

        let snapshots = stmt
            .query_map(params![limit], |row| {
                Ok(RepositorySnapshot {
                    id: row.get(0)?,
                    full_name: row.get(1)?,
                    owner: row.get(2)?,
                    name: row.get(3)?,
                    star_count: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    last_star_count_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }

    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    pub fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO crawl_runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                format_timestamp(Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Marks a run as finished with the given status
    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        records_written: Option<u64>,
    ) -> StorageResult<()> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = ?2, records_written = ?3
             WHERE id = ?4",
            params![
                status.to_db_string(),
                format_timestamp(Utc::now()),
                records_written.and_then(|n| i64::try_from(n).ok()),
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status, records_written
             FROM crawl_runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent run
    pub fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.pool.get()?;
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status, records_written
                 FROM crawl_runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }
}

impl RecordStore for BatchStore {
    fn upsert_batch(&self, records: &[Record]) -> StorageResult<usize> {
        self.upsert_batch_at(records, Utc::now())
    }

    fn count(&self) -> StorageResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        records_written: row.get(5)?,
    })
}

/// SQLite integers are signed; star counts never approach the limit
fn star_count_column(stars: u64) -> i64 {
    i64::try_from(stars).unwrap_or(i64::MAX)
}
