//! SQLite connection pool
//!
//! Pooling is delegated to `r2d2`. Every new connection gets the pragmas
//! below; the schema is created on the first checkout. A checked-out
//! [`PooledConnection`] goes back to the pool when dropped, so every exit
//! path of a caller (including `?` and panics) returns it.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::StorageResult;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

/// How long a checkout waits for a free connection by default
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded pool of SQLite connections to one database
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// A checked-out connection; returned to the pool on drop
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const FILE_PRAGMAS: &str = "
    PRAGMA busy_timeout = 5000;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
";

/// Opens a pool of `size` connections to the database file at `path`
pub fn open(path: &Path, size: usize) -> StorageResult<ConnectionPool> {
    let manager =
        SqliteConnectionManager::file(path).with_init(|conn| conn.execute_batch(FILE_PRAGMAS));
    let pool = builder(size).build(manager)?;

    initialize_schema(&*pool.get()?)?;

    tracing::debug!("Opened {} connections to {}", pool.max_size(), path.display());
    Ok(pool)
}

/// Opens a single-connection pool over a private in-memory database
///
/// Each in-memory connection is its own database, so the pool never grows
/// past one and the connection is never recycled.
pub fn open_in_memory() -> StorageResult<ConnectionPool> {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(conn)
    });
    Ok(builder(1).build(manager)?)
}

fn builder(size: usize) -> r2d2::Builder<SqliteConnectionManager> {
    r2d2::Pool::builder()
        .max_size(size.max(1) as u32)
        .connection_timeout(DEFAULT_CHECKOUT_TIMEOUT)
        .idle_timeout(None)
        .max_lifetime(None)
}
