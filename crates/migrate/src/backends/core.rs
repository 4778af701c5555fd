//! Core Database Backend Traits
//!
//! The ledger and the applier only ever talk to the database through these
//! traits, so each receives its handle by injection and tests can run the
//! whole engine against an in-memory SQLite database.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::MigrationResult;
use crate::migrations::definitions::LedgerEntry;

/// Abstract migration database handle (a connection pool)
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    /// SQL dialect spoken by this backend
    fn dialect(&self) -> SqlDialect;

    /// Execute one parameterised statement outside any transaction
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Run a query whose first column is an integer count
    async fn fetch_count(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<i64>;

    /// Run a query selecting `sequence_id`, `name`, `created_at` ledger columns
    async fn fetch_entries(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<LedgerEntry>>;

    /// Begin a transaction whose statements the server aborts after
    /// `statement_timeout`, where the backend supports it
    async fn begin(
        &self,
        statement_timeout: Duration,
    ) -> MigrationResult<Box<dyn MigrationTransaction>>;

    /// Take the batch-wide advisory lock identified by `key`
    async fn lock(&self, key: &str) -> MigrationResult<()>;

    /// Release the advisory lock taken by [`MigrationBackend::lock`]
    async fn unlock(&self, key: &str) -> MigrationResult<()>;

    /// Round-trip a trivial query; returns its latency
    async fn health_check(&self) -> MigrationResult<Duration>;

    /// Close the pool
    async fn close(&self);
}

/// Abstract database transaction.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait MigrationTransaction: Send {
    /// Execute a migration script: possibly many statements, sent unprepared
    async fn execute_script(&mut self, script: &str) -> MigrationResult<()>;

    /// Execute one parameterised statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Run a count query within the transaction
    async fn fetch_count(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<i64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Int64(i64),
    String(String),
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => format!("?{}", index + 1),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quote an identifier, doubling any embedded quote characters
    pub fn quote_identifier(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }

    /// Column definition of an auto-incrementing integer primary key
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "SERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}
