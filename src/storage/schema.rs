//! Database schema definitions
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision
//! and a `Z` suffix, so text order equals time order.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Current state of every harvested repository
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    created_at TEXT,
    updated_at TEXT,
    last_crawled_at TEXT NOT NULL,
    CONSTRAINT unique_owner_name UNIQUE (owner, name)
);

CREATE INDEX IF NOT EXISTS idx_repos_last_crawled_at ON repositories(last_crawled_at);

-- Star count time series
CREATE TABLE IF NOT EXISTS repository_stars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    star_count INTEGER NOT NULL,
    observed_at TEXT NOT NULL,
    CONSTRAINT unique_repo_observation UNIQUE (repository_id, observed_at)
);

CREATE INDEX IF NOT EXISTS idx_stars_observed_at ON repository_stars(observed_at DESC);

-- Most recent observation per repository
CREATE VIEW IF NOT EXISTS latest_repository_stars AS
SELECT
    rs.repository_id,
    r.full_name,
    rs.star_count,
    rs.observed_at
FROM repository_stars rs
JOIN repositories r ON r.id = rs.repository_id
WHERE rs.observed_at = (
    SELECT MAX(latest.observed_at)
    FROM repository_stars latest
    WHERE latest.repository_id = rs.repository_id
);

-- Track crawl runs
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    records_written INTEGER
);
"#;

/// Initializes the database schema
///
/// Safe to run against an existing database.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
