//! PostgreSQL Backend Implementation
//!
//! PostgreSQL-specific implementation of the backend traits using sqlx as the
//! underlying database driver. DDL is transactional here, so a migration's
//! script and its ledger row commit or roll back together.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::core::*;
use crate::config::redact;
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::definitions::LedgerEntry;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL database backend implementation
pub struct PostgresBackend {
    pool: PgPool,
    /// Connection holding the session-level advisory lock, while a batch runs
    lock_conn: Mutex<Option<sqlx::pool::PoolConnection<Postgres>>>,
}

impl PostgresBackend {
    pub async fn connect(url: &str, config: &PoolConfig) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(2))
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| {
                MigrationError::Connection(format!(
                    "Failed to connect to {}: {}",
                    redact(url),
                    e
                ))
            })?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MigrationBackend for PostgresBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
        statement_timeout: Duration,
    ) -> MigrationResult<Box<dyn MigrationTransaction>> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            MigrationError::Database(format!("Failed to start transaction: {}", e))
        })?;

        // Scoped to this transaction; the server cancels a runaway script itself
        let set_timeout = statement_timeout_sql(statement_timeout);
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&set_timeout))
            .await
            .map_err(|e| {
                MigrationError::Database(format!("Failed to set statement timeout: {}", e))
            })?;

        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn lock(&self, key: &str) -> MigrationResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            MigrationError::Connection(format!("Failed to acquire lock connection: {}", e))
        })?;

        sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                MigrationError::Database(format!("Failed to take advisory lock '{}': {}", key, e))
            })?;

        *self.lock_conn.lock().await = Some(conn);
        tracing::debug!(key, "Advisory lock acquired");
        Ok(())
    }

    async fn unlock(&self, key: &str) -> MigrationResult<()> {
        let Some(mut conn) = self.lock_conn.lock().await.take() else {
            return Ok(());
        };

        let released = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(key)
            .execute(&mut *conn)
            .await;

        if let Err(e) = released {
            // Session locks die with the session; never hand this connection back
            let _ = conn.close().await;
            return Err(MigrationError::Database(format!(
                "Failed to release advisory lock '{}': {}",
                key, e
            )));
        }

        tracing::debug!(key, "Advisory lock released");
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

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl MigrationTransaction for PostgresTransaction {
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

/// `SET LOCAL` for the transaction-scoped server-side statement timeout
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1))
}

/// Bind DatabaseValues to a sqlx query
fn bind_values<'q>(mut query: PgQuery<'q>, params: &'q [DatabaseValue]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(None::<String>),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::String(s) => query.bind(s.as_str()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_timeout_sql() {
        assert_eq!(
            statement_timeout_sql(Duration::from_secs(5)),
            "SET LOCAL statement_timeout = 5000"
        );
        // Zero would disable the server-side timeout altogether
        assert_eq!(
            statement_timeout_sql(Duration::ZERO),
            "SET LOCAL statement_timeout = 1"
        );
    }
}
