//! SQLite persistence
//!
//! Optional long-term memory backend. The database runs in WAL mode so a
//! reader never blocks the single writer. The schema is versioned with
//! SQLite's `user_version` pragma; each embedded migration runs once, inside
//! its own transaction, when the stored version is below it.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub mod memory;

pub use memory::SqliteStore;

/// (version, name, sql), ascending
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "long_term_memory",
    include_str!("../../migrations/001_long_term_memory.sql"),
)];

/// Connection pool over the memory database
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and bring its schema up to date
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        let db = Self { pool };
        let version = db.migrate().await?;
        info!(
            "Memory database ready at {} (schema v{})",
            db_path.display(),
            version
        );

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stored schema version; 0 for a database no migration has touched
    pub async fn schema_version(&self) -> Result<i64> {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read schema version")
    }

    async fn migrate(&self) -> Result<i64> {
        let mut current = self.schema_version().await?;

        for (version, name, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            debug!("Applying migration {:03}_{}", version, name);

            let mut tx = self.pool.begin().await.context("Failed to begin migration")?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Migration {:03}_{} failed", version, name))?;
            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await
                .context("Failed to record schema version")?;
            tx.commit().await.context("Failed to commit migration")?;

            current = *version;
        }

        Ok(current)
    }

    /// Checkpoint the WAL into the main file and close every connection
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to checkpoint WAL")?;
        self.pool.close().await;

        debug!("Memory database closed");
        Ok(())
    }
}
