//! Database Backend Abstractions
//!
//! PostgreSQL is the production target; SQLite backs local development and
//! the test-suite. Both sit behind [`MigrationBackend`].

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use crate::config::redact;
use crate::error::{MigrationError, MigrationResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(MigrationError::Connection(format!(
                "Unable to detect database backend from URL: {}",
                redact(url)
            )))
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Open a pool for `url` and verify the database answers.
///
/// Any failure here is a `Connection` error, raised before planning starts.
pub async fn connect(url: &str, config: PoolConfig) -> MigrationResult<Arc<dyn MigrationBackend>> {
    let backend: Arc<dyn MigrationBackend> = match DatabaseBackendType::from_url(url)? {
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresBackend::connect(url, &config).await?),
        DatabaseBackendType::SQLite => Arc::new(SqliteBackend::connect(url, &config).await?),
    };

    let latency = backend.health_check().await?;
    tracing::debug!(
        backend = %DatabaseBackendType::from_url(url)?,
        latency_ms = latency.as_millis() as u64,
        "Database reachable"
    );

    Ok(backend)
}
