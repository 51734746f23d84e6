//! Shared database types and utilities.
//!
//! Provides `DatabaseError`, `unix_timestamp()`, pool creation helpers and
//! the `define_database!` macro used by the server's catalog store.

use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Database errors shared across `ez2boot` crates.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A UNIQUE constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        if is_unique_violation(&e) {
            Self::Conflict(e.to_string())
        } else {
            Self::Query(e.to_string())
        }
    }
}

/// Returns `true` when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Open (or create) a `SQLite` connection pool at the given file path.
///
/// Creates the parent directory if it does not exist, enables WAL journal
/// mode, foreign keys, and sets a 5-second busy timeout.
pub async fn open_pool(path: &Path) -> Result<Pool<Sqlite>, DatabaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io(e.to_string()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!(path = %path.display(), "Database opened");

    Ok(pool)
}

/// Open an in-memory `SQLite` connection pool (for testing).
///
/// Each in-memory connection is its own database, so the pool is pinned to a
/// single connection that never idles out.
pub async fn open_pool_in_memory() -> Result<Pool<Sqlite>, DatabaseError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    Ok(pool)
}

/// Returns the current time as a Unix timestamp (seconds since epoch).
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Macro to define a `Database`-like struct with `open`, `open_in_memory`,
/// `run_migrations`, and `pool` methods.
///
/// Usage:
/// ```ignore
/// ez2boot_core::define_database!(CatalogDatabase, "Catalog migrations complete");
/// ```
///
/// The generated struct has:
/// - `pub async fn open(path: &Path) -> Result<Self, DatabaseError>`
/// - `pub async fn open_in_memory() -> Result<Self, DatabaseError>`
/// - `async fn run_migrations(&self) -> Result<(), DatabaseError>`
/// - `pub const fn pool(&self) -> &Pool<Sqlite>`
#[macro_export]
macro_rules! define_database {
    ($name:ident, $migration_msg:expr) => {
        #[derive(Clone)]
        pub struct $name {
            pool: ::sqlx::Pool<::sqlx::Sqlite>,
        }

        impl $name {
            /// Open or create a database at the given path.
            pub async fn open(
                path: &::std::path::Path,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let pool = $crate::db::open_pool(path).await?;
                let db = Self { pool };
                db.run_migrations().await?;
                Ok(db)
            }

            /// Open an in-memory database (for testing).
            pub async fn open_in_memory() -> ::std::result::Result<Self, $crate::db::DatabaseError>
            {
                let pool = $crate::db::open_pool_in_memory().await?;
                let db = Self { pool };
                db.run_migrations().await?;
                Ok(db)
            }

            /// Run database migrations.
            async fn run_migrations(&self) -> ::std::result::Result<(), $crate::db::DatabaseError> {
                ::sqlx::migrate!("./migrations")
                    .run(&self.pool)
                    .await
                    .map_err(|e| $crate::db::DatabaseError::Migration(e.to_string()))?;

                ::tracing::info!($migration_msg);
                Ok(())
            }

            /// Get a reference to the connection pool.
            pub const fn pool(&self) -> &::sqlx::Pool<::sqlx::Sqlite> {
                &self.pool
            }
        }
    };
}
