//! Long-term memory in SQLite
//!
//! Each save replaces the whole table inside one transaction, so readers see
//! either the previous mapping or the new one.

use crate::memory::{LongTermStore, MemoryEntry};
use anyhow::Context;
use async_trait::async_trait;
use sdk::errors::PipelineError;
use sqlx::{Row, SqlitePool};

/// `LongTermStore` over the `long_term_memory` table
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_rows(&self) -> anyhow::Result<Vec<MemoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value, updated_at
            FROM long_term_memory
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query long_term_memory")?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let raw: String = row.get("value");
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Stored value for '{}' is not JSON", key))?;
            entries.push(MemoryEntry {
                key,
                value,
                updated_at: row.get("updated_at"),
            });
        }

        Ok(entries)
    }

    async fn replace_rows(&self, entries: &[MemoryEntry]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM long_term_memory")
            .execute(&mut *tx)
            .await
            .context("Failed to clear long_term_memory")?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO long_term_memory (key, value, updated_at)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&entry.key)
            .bind(entry.value.to_string())
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert memory entry '{}'", entry.key))?;
        }

        tx.commit().await.context("Failed to commit memory rewrite")?;
        Ok(())
    }
}

#[async_trait]
impl LongTermStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self) -> Result<Vec<MemoryEntry>, PipelineError> {
        self.load_rows()
            .await
            .map_err(|e| PipelineError::Persistence(format!("{:#}", e)))
    }

    async fn save(&self, entries: &[MemoryEntry]) -> Result<(), PipelineError> {
        self.replace_rows(entries)
            .await
            .map_err(|e| PipelineError::Persistence(format!("{:#}", e)))
    }
}
