//! Database connection pool management.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct DbPool {
    pool: SqlitePool,
}

impl DbPool {
    /// Create a new database pool from a SQLite database path.
    ///
    /// `":memory:"` opens a private in-memory database held by a single
    /// connection, which is what the tests use.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:" || db_path == "sqlite::memory:";
        let mut options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(10)
        };
        let pool = pool_options.connect_with(options).await?;

        info!("Connected to database at {}", db_path);

        Ok(Self { pool })
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the embedded migrations to set up the database schema.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations completed");
        Ok(())
    }
}
