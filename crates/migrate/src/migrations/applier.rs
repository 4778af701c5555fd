//! Migration Applier - runs one migration script and its ledger update atomically
//!
//! A migration moves Planned -> Executing -> Recorded | Failed | Diverged.
//! The script and the ledger write share one transaction; any failure before
//! commit rolls both back. A script that succeeded but whose ledger write or
//! commit failed is reported as a divergence so it is never mistaken for a
//! plain script error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::definitions::{ApplyOutcome, MigrationDirection, MigrationFile};
use super::ledger::Ledger;
use super::store::has_statements;
use crate::backends::{MigrationBackend, MigrationTransaction};
use crate::error::{MigrationError, MigrationResult};

impl From<MigrationResult<()>> for ApplyOutcome {
    fn from(result: MigrationResult<()>) -> Self {
        match result {
            Ok(()) => ApplyOutcome::Recorded,
            Err(e) if e.is_divergence() => ApplyOutcome::Diverged(e),
            Err(e) => ApplyOutcome::Failed(e),
        }
    }
}

/// Executes single migrations against the backend
pub struct Applier {
    backend: Arc<dyn MigrationBackend>,
    ledger: Arc<Ledger>,
    statement_timeout: Duration,
}

impl Applier {
    pub fn new(
        backend: Arc<dyn MigrationBackend>,
        ledger: Arc<Ledger>,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            ledger,
            statement_timeout,
        }
    }

    /// Apply `file` in `direction`, returning its terminal state
    pub async fn apply(
        &self,
        file: &MigrationFile,
        direction: MigrationDirection,
        cancel: &CancellationToken,
    ) -> ApplyOutcome {
        self.try_apply(file, direction, cancel).await.into()
    }

    /// Like [`Applier::apply`] but as a `Result`; `Divergence` errors mark the Diverged state
    pub async fn try_apply(
        &self,
        file: &MigrationFile,
        direction: MigrationDirection,
        cancel: &CancellationToken,
    ) -> MigrationResult<()> {
        let identifier = file.identifier.as_str();
        let cancelled = || MigrationError::Cancelled {
            identifier: identifier.to_string(),
        };

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let mut tx = self
            .bounded(self.backend.begin(self.statement_timeout))
            .await
            .map_err(|e| {
                MigrationError::script(
                    identifier,
                    direction,
                    format!("could not start transaction: {}", e),
                )
            })?;

        tracing::debug!(migration = identifier, direction = %direction, "Executing migration");

        let script = file.script(direction);
        if has_statements(script) {
            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(cancelled()),
                result = self.bounded(tx.execute_script(script)) => result.map_err(|e| {
                    MigrationError::script(identifier, direction, e.to_string())
                }),
            };

            if let Err(e) = executed {
                self.rollback(tx, identifier).await;
                return Err(e);
            }
        } else {
            tracing::debug!(migration = identifier, "Script is empty, only updating the ledger");
        }

        let bookkeeping = match direction {
            MigrationDirection::Up => self.ledger.record(tx.as_mut(), identifier).await,
            MigrationDirection::Down => self.ledger.unrecord(tx.as_mut(), identifier).await,
        };

        if let Err(e) = bookkeeping {
            let rolled_back = self.rollback(tx, identifier).await;
            return Err(MigrationError::divergence(
                identifier,
                direction,
                format!(
                    "script executed but the ledger update failed: {}; {}",
                    e,
                    if rolled_back {
                        "the transaction was rolled back"
                    } else {
                        "the transaction rollback also failed"
                    }
                ),
            ));
        }

        if cancel.is_cancelled() {
            self.rollback(tx, identifier).await;
            return Err(cancelled());
        }

        self.bounded(tx.commit()).await.map_err(|e| {
            MigrationError::divergence(
                identifier,
                direction,
                format!("commit failed after the ledger update, outcome unknown: {}", e),
            )
        })?;

        tracing::info!(migration = identifier, direction = %direction, "Migration applied");
        Ok(())
    }

    async fn rollback(&self, tx: Box<dyn MigrationTransaction>, identifier: &str) -> bool {
        match self.bounded(tx.rollback()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(migration = identifier, error = %e, "Rollback failed");
                false
            }
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> MigrationResult<T>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        tokio::time::timeout(self.statement_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(MigrationError::Database(format!(
                    "statement timed out after {}s",
                    self.statement_timeout.as_secs_f64()
                )))
            })
    }
}
