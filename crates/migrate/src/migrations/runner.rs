//! Migration Runner - executes migration batches against the database
//!
//! A batch takes the advisory lock, makes sure the ledger table exists,
//! computes a plan and applies it one migration at a time. The first
//! migration that does not reach `Recorded` halts the batch; everything
//! applied before it stays applied.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::applier::Applier;
use super::definitions::{
    ApplyOutcome, BatchOutcome, BatchReport, MigrationCount, MigrationDirection,
};
use super::ledger::Ledger;
use super::planner::{MigrationPlan, Planner, StatusRow};
use super::store::MigrationStore;
use crate::backends::{self, MigrationBackend, PoolConfig};
use crate::config::MigratorConfig;
use crate::error::MigrationResult;

/// Advisory lock key shared by every process migrating the same ledger
const LOCK_PREFIX: &str = "dbmi";

/// What `init` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    /// The migration directory had to be created
    pub created_dir: bool,
}

/// Migration runner: owns the store, ledger, planner and applier for one database
pub struct Migrator {
    backend: Arc<dyn MigrationBackend>,
    store: MigrationStore,
    ledger: Arc<Ledger>,
    planner: Planner,
    applier: Applier,
    strict: bool,
}

impl Migrator {
    /// Create a migrator over an already connected backend
    pub fn new(backend: Arc<dyn MigrationBackend>, config: &MigratorConfig) -> Self {
        let store = MigrationStore::new(config.migrations_dir.clone());
        let ledger = Arc::new(Ledger::new(
            backend.clone(),
            config.table_name.clone(),
            config.statement_timeout,
        ));
        let planner = Planner::new(store.clone(), ledger.clone());
        let applier = Applier::new(backend.clone(), ledger.clone(), config.statement_timeout);

        Self {
            backend,
            store,
            ledger,
            planner,
            applier,
            strict: false,
        }
    }

    /// Validate `config`, connect to its database and build a migrator
    pub async fn connect(config: &MigratorConfig) -> MigrationResult<Self> {
        config.validate()?;

        let pool = PoolConfig {
            max_connections: config.max_connections,
            acquire_timeout: config.statement_timeout,
        };
        let backend = backends::connect(&config.connection_string, pool).await?;

        tracing::info!(
            database = %config.redacted_connection(),
            table = %config.table_name,
            "Connected to database"
        );
        Ok(Self::new(backend, config))
    }

    /// Refuse to run a batch while any migration file is unparseable
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn backend(&self) -> &Arc<dyn MigrationBackend> {
        &self.backend
    }

    fn lock_key(&self) -> String {
        format!("{}:{}", LOCK_PREFIX, self.ledger.table_name())
    }

    /// Create the migration directory and the ledger table if missing
    pub async fn init(&self) -> MigrationResult<InitReport> {
        let created_dir = self.store.ensure_dir()?;
        self.ledger.ensure_schema().await?;

        tracing::info!(
            dir = %self.store.dir().display(),
            table = %self.ledger.table_name(),
            created_dir,
            "Migrations initialized"
        );
        Ok(InitReport { created_dir })
    }

    /// Compute what a batch would do without executing anything
    pub async fn plan(
        &self,
        direction: MigrationDirection,
        count: MigrationCount,
    ) -> MigrationResult<MigrationPlan> {
        self.ledger.ensure_schema().await?;
        self.planner.plan(direction, count).await
    }

    /// Every migration known to the directory or the ledger, with its state
    pub async fn status(&self) -> MigrationResult<Vec<StatusRow>> {
        self.ledger.ensure_schema().await?;
        self.planner.status().await
    }

    /// Write a new migration file named after `name`
    pub fn create(&self, name: &str) -> MigrationResult<std::path::PathBuf> {
        self.store.create(name, Utc::now())
    }

    /// Run one batch. Errors are returned only when nothing was executed;
    /// a halted or diverged batch comes back as a report.
    pub async fn migrate(
        &self,
        direction: MigrationDirection,
        count: MigrationCount,
        cancel: &CancellationToken,
    ) -> MigrationResult<BatchReport> {
        let key = self.lock_key();
        self.backend.lock(&key).await?;

        let result = self.run_locked(direction, count, cancel).await;

        if let Err(e) = self.backend.unlock(&key).await {
            tracing::error!(error = %e, "Failed to release migration lock");
        }
        result
    }

    async fn run_locked(
        &self,
        direction: MigrationDirection,
        count: MigrationCount,
        cancel: &CancellationToken,
    ) -> MigrationResult<BatchReport> {
        let start_time = Instant::now();

        self.ledger.ensure_schema().await?;
        let mut plan = self.planner.plan(direction, count).await?;

        for problem in &plan.invalid {
            tracing::warn!(error = %problem, "Skipping invalid migration file");
        }
        if self.strict && !plan.invalid.is_empty() {
            return Err(plan.invalid.remove(0));
        }

        let planned = plan.identifiers();
        if plan.steps.is_empty() {
            tracing::info!(direction = %direction, "No migrations to run");
            return Ok(BatchReport {
                direction,
                planned,
                completed: Vec::new(),
                outcome: BatchOutcome::NothingToDo,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let total = plan.steps.len();
        let mut completed = Vec::with_capacity(total);
        let mut outcome = BatchOutcome::Completed;

        for step in &plan.steps {
            let applied = match step.require_file() {
                Ok(file) => self.applier.apply(file, direction, cancel).await,
                Err(e) => ApplyOutcome::Failed(e),
            };

            match applied {
                ApplyOutcome::Recorded => completed.push(step.identifier.clone()),
                ApplyOutcome::Failed(error) => {
                    tracing::error!(
                        migration = %step.identifier,
                        error = %error,
                        "Applied {} of {} migrations, halting",
                        completed.len(),
                        total
                    );
                    outcome = BatchOutcome::Halted {
                        identifier: step.identifier.clone(),
                        error,
                    };
                    break;
                }
                ApplyOutcome::Diverged(error) => {
                    tracing::error!(
                        migration = %step.identifier,
                        error = %error,
                        "Applied {} of {} migrations; ledger and schema disagree, manual review required",
                        completed.len(),
                        total
                    );
                    outcome = BatchOutcome::Diverged {
                        identifier: step.identifier.clone(),
                        error,
                    };
                    break;
                }
            }
        }

        if matches!(outcome, BatchOutcome::Completed) {
            tracing::info!(
                direction = %direction,
                "Applied {} of {} migrations",
                completed.len(),
                total
            );
        }

        Ok(BatchReport {
            direction,
            planned,
            completed,
            outcome,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.backend.close().await;
    }
}
