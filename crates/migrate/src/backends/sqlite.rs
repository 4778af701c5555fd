//! SQLite Backend Implementation
//!
//! Used for local development and by the test-suite (`sqlite::memory:`).
//! SQLite serialises writers itself, so the advisory lock is a no-op.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::definitions::LedgerEntry;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite database backend implementation
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(url: &str, config: &PoolConfig) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MigrationError::Connection(format!("Invalid SQLite URL '{}': {}", url, e)))?
            .create_if_missing(true);

        // Every connection to an in-memory database opens a fresh, empty one
        let pool_options = if is_memory_url(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to open {}: {}", url, e)))?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl MigrationBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let result = bind_values(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_count(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<i64> {
        let row = bind_values(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn fetch_entries(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<LedgerEntry>> {
        let rows = bind_values(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> MigrationResult<LedgerEntry> {
                Ok(LedgerEntry {
                    sequence_id: row.try_get("sequence_id")?,
                    identifier: row.try_get("name")?,
                    applied_at: row
                        .try_get::<chrono::NaiveDateTime, _>("created_at")?
                        .and_utc(),
                })
            })
            .collect()
    }

    async fn begin(
        &self,
        _statement_timeout: Duration,
    ) -> MigrationResult<Box<dyn MigrationTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            MigrationError::Database(format!("Failed to start transaction: {}", e))
        })?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn lock(&self, key: &str) -> MigrationResult<()> {
        tracing::debug!(key, "SQLite serialises writers; no advisory lock taken");
        Ok(())
    }

    async fn unlock(&self, _key: &str) -> MigrationResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MigrationResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::Connection(format!("Health check failed: {}", e)))?;

        Ok(start.elapsed())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl MigrationTransaction for SqliteTransaction {
    async fn execute_script(&mut self, script: &str) -> MigrationResult<()> {
        sqlx::Executor::execute(&mut *self.tx, sqlx::raw_sql(script)).await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let result = bind_values(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<i64> {
        let row = bind_values(sqlx::query(sql), params)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| MigrationError::Database(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| MigrationError::Database(format!("Transaction rollback failed: {}", e)))
    }
}

/// Bind DatabaseValues to a sqlx query
fn bind_values<'q>(mut query: SqliteQuery<'q>, params: &'q [DatabaseValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(None::<String>),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::String(s) => query.bind(s.as_str()),
        };
    }
    query
}
