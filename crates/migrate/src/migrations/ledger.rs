//! Migration Ledger - durable record of applied migrations
//!
//! One row per applied migration: `id` (auto-increment sequence), `name`
//! (the migration identifier) and `created_at` (insertion time). Reads and
//! DDL run directly on the pool; `record`/`unrecord` always run inside the
//! transaction that executes the migration's script.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::definitions::LedgerEntry;
use crate::backends::{DatabaseValue, MigrationBackend, MigrationTransaction, SqlDialect};
use crate::error::{MigrationError, MigrationResult};

pub struct Ledger {
    backend: Arc<dyn MigrationBackend>,
    table: String,
    statement_timeout: Duration,
}

impl Ledger {
    /// `table` must already be validated as a plain SQL identifier
    pub fn new(
        backend: Arc<dyn MigrationBackend>,
        table: impl Into<String>,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            statement_timeout,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> SqlDialect {
        self.backend.dialect()
    }

    fn quoted_table(&self) -> String {
        self.dialect().quote_identifier(&self.table)
    }

    fn placeholder(&self) -> String {
        self.dialect().parameter_placeholder(0)
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        let dialect = self.dialect();
        let created_default = match dialect {
            SqlDialect::PostgreSQL => "(NOW() AT TIME ZONE 'UTC')",
            SqlDialect::SQLite => "CURRENT_TIMESTAMP",
        };

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id {},\n    \
                name VARCHAR(256) NOT NULL,\n    \
                created_at TIMESTAMP NOT NULL DEFAULT {}\n\
            )",
            self.quoted_table(),
            dialect.auto_increment_primary_key(),
            created_default
        )
    }

    /// SQL selecting ledger rows in application order (or its reverse)
    pub fn select_entries_sql(&self, limit: i64, most_recent_first: bool) -> String {
        let order = if most_recent_first { "DESC" } else { "ASC" };
        let mut sql = format!(
            "SELECT CAST(id AS BIGINT) AS sequence_id, name, created_at FROM {} \
             ORDER BY created_at {order}, id {order}",
            self.quoted_table()
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {}", self.placeholder()));
        }
        sql
    }

    /// SQL to record a migration as applied
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name) VALUES ({})",
            self.quoted_table(),
            self.placeholder()
        )
    }

    /// SQL to remove a migration record
    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE name = {}",
            self.quoted_table(),
            self.placeholder()
        )
    }

    /// SQL to check if a migration has been recorded
    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE name = {}",
            self.quoted_table(),
            self.placeholder()
        )
    }

    /// Create the ledger table if it does not exist; safe to repeat
    pub async fn ensure_schema(&self) -> MigrationResult<()> {
        let sql = self.create_table_sql();
        self.bounded("create ledger table", self.backend.execute(&sql, &[]))
            .await
            .map_err(|e| {
                MigrationError::Database(format!(
                    "Failed to create ledger table {}: {}",
                    self.table, e
                ))
            })?;
        tracing::debug!(table = %self.table, "Ledger table ready");
        Ok(())
    }

    /// Ledger rows, oldest first, or the `limit` most recent first. `limit <= 0` means all.
    pub async fn entries(
        &self,
        limit: i64,
        most_recent_first: bool,
    ) -> MigrationResult<Vec<LedgerEntry>> {
        let sql = self.select_entries_sql(limit, most_recent_first);
        let params: Vec<DatabaseValue> = if limit > 0 {
            vec![limit.into()]
        } else {
            Vec::new()
        };

        self.bounded("read ledger", self.backend.fetch_entries(&sql, &params))
            .await
            .map_err(|e| {
                MigrationError::Database(format!("Failed to query applied migrations: {}", e))
            })
    }

    /// Identifiers of applied migrations; see [`Ledger::entries`] for ordering and `limit`
    pub async fn applied_identifiers(
        &self,
        limit: i64,
        most_recent_first: bool,
    ) -> MigrationResult<Vec<String>> {
        Ok(self
            .entries(limit, most_recent_first)
            .await?
            .into_iter()
            .map(|entry| entry.identifier)
            .collect())
    }

    /// Check if a migration has been recorded
    pub async fn contains(&self, identifier: &str) -> MigrationResult<bool> {
        let sql = self.count_sql();
        let params = [DatabaseValue::from(identifier)];
        let count = self
            .bounded("check ledger", self.backend.fetch_count(&sql, &params))
            .await?;
        Ok(count > 0)
    }

    /// Insert a ledger row within `tx`; `Conflict` if the identifier is already there
    pub async fn record(
        &self,
        tx: &mut dyn MigrationTransaction,
        identifier: &str,
    ) -> MigrationResult<()> {
        let params = [DatabaseValue::from(identifier)];

        let existing = self
            .bounded("check ledger", tx.fetch_count(&self.count_sql(), &params))
            .await?;
        if existing > 0 {
            return Err(MigrationError::Conflict {
                identifier: identifier.to_string(),
            });
        }

        self.bounded("record migration", tx.execute(&self.insert_sql(), &params))
            .await?;
        Ok(())
    }

    /// Delete the ledger row within `tx`; `NotFound` if there was none
    pub async fn unrecord(
        &self,
        tx: &mut dyn MigrationTransaction,
        identifier: &str,
    ) -> MigrationResult<()> {
        let params = [DatabaseValue::from(identifier)];
        let removed = self
            .bounded("unrecord migration", tx.execute(&self.delete_sql(), &params))
            .await?;

        if removed == 0 {
            return Err(MigrationError::NotFound {
                identifier: identifier.to_string(),
            });
        }
        Ok(())
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> MigrationResult<T>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        tokio::time::timeout(self.statement_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(MigrationError::Database(format!(
                    "{} timed out after {}s",
                    what,
                    self.statement_timeout.as_secs_f64()
                )))
            })
    }
}
