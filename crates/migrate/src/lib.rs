//! # dbmi-migrate: Plain SQL Migrations
//!
//! Applies and reverts hand-written SQL migration files against PostgreSQL
//! or SQLite. Each file holds an up-script and a down-script separated by a
//! `/*DOWN*/` line; a ledger table records which files have been applied.
//!
//! Every migration runs in its own transaction together with its ledger
//! update, batches halt at the first failure, and a migration whose script
//! ran but whose ledger update did not is reported as a divergence rather
//! than a plain failure.

pub mod backends;
pub mod config;
pub mod error;
pub mod logging;
pub mod migrations;

pub use backends::{DatabaseBackendType, MigrationBackend, MigrationTransaction, PoolConfig, SqlDialect};
pub use config::{ConfigError, ConfigSource, MigratorConfig};
pub use error::{ErrorKind, MigrationError, MigrationResult};
pub use logging::{init_logging, log_batch_report, LoggingConfig};
pub use migrations::*;

pub use tokio_util::sync::CancellationToken;
