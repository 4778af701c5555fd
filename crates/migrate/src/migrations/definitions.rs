//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the types shared by the store, ledger, planner and applier:
//! on-disk migration files, ledger rows, directions and batch reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::error::MigrationError;

/// Line separating the up-script from the down-script in a migration file
pub const MIGRATION_SEPARATOR: &str = "/*DOWN*/";

/// Extension of migration files
pub const MIGRATION_EXTENSION: &str = "sql";

/// A migration file parsed from the migration directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File base name, e.g. `1700000000_create_items.sql`; sorts chronologically
    pub identifier: String,
    /// SQL applied when migrating up
    pub up_script: String,
    /// SQL applied when migrating down
    pub down_script: String,
    /// Where the file was read from
    pub path: PathBuf,
}

impl MigrationFile {
    /// Script to run for the given direction
    pub fn script(&self, direction: MigrationDirection) -> &str {
        match direction {
            MigrationDirection::Up => &self.up_script,
            MigrationDirection::Down => &self.down_script,
        }
    }
}

/// One row of the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Auto-incremented by the database; strictly increasing in application order
    pub sequence_id: i64,
    /// Migration identifier
    pub identifier: String,
    /// When the row was inserted
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run the up-script)
    Up,
    /// Revert the migration (run the down-script)
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MigrationDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(MigrationDirection::Up),
            "down" => Ok(MigrationDirection::Down),
            _ => Err(format!("Unknown migration direction '{}': expected up or down", s)),
        }
    }
}

/// How many migrations a batch may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCount {
    /// Every eligible migration
    All,
    /// At most this many
    Limit(usize),
}

impl MigrationCount {
    /// `0` or less means "all", matching the ledger's `limit` convention
    pub fn from_limit(limit: i64) -> Self {
        if limit <= 0 {
            MigrationCount::All
        } else {
            MigrationCount::Limit(limit as usize)
        }
    }

    /// Ledger limit value; `0` stands for "all"
    pub fn as_limit(&self) -> i64 {
        match self {
            MigrationCount::All => 0,
            MigrationCount::Limit(n) => *n as i64,
        }
    }

    pub fn clamp(&self, available: usize) -> usize {
        match self {
            MigrationCount::All => available,
            MigrationCount::Limit(n) => (*n).min(available),
        }
    }
}

/// Per-migration state reported by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    /// File on disk, not in the ledger
    Pending,
    /// File on disk and recorded in the ledger
    Applied {
        applied_at: DateTime<Utc>,
        sequence_id: i64,
    },
    /// Recorded in the ledger but the file is gone from disk
    Orphaned {
        applied_at: DateTime<Utc>,
        sequence_id: i64,
    },
}

/// Terminal state of one planned migration
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Script ran and the ledger was updated in the same transaction
    Recorded,
    /// Script failed, timed out or was cancelled; ledger untouched
    Failed(MigrationError),
    /// Script ran but the ledger write or commit failed
    Diverged(MigrationError),
}

/// How a batch ended
#[derive(Debug)]
pub enum BatchOutcome {
    /// The plan was empty
    NothingToDo,
    /// Every planned migration was recorded
    Completed,
    /// A migration failed; nothing after it ran
    Halted { identifier: String, error: MigrationError },
    /// A migration left script and ledger disagreeing; nothing after it ran
    Diverged { identifier: String, error: MigrationError },
}

/// Result of running one batch of migrations
#[derive(Debug)]
pub struct BatchReport {
    pub direction: MigrationDirection,
    /// Identifiers in planned execution order
    pub planned: Vec<String>,
    /// Identifiers that reached `Recorded`, in execution order
    pub completed: Vec<String>,
    pub outcome: BatchOutcome,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            BatchOutcome::NothingToDo | BatchOutcome::Completed
        )
    }

    /// The error that stopped the batch, if any
    pub fn error(&self) -> Option<&MigrationError> {
        match &self.outcome {
            BatchOutcome::Halted { error, .. } | BatchOutcome::Diverged { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }

    /// Consume the report, turning a failed batch into its error
    pub fn into_result(self) -> Result<Self, MigrationError> {
        match self.outcome {
            BatchOutcome::Halted { error, .. } | BatchOutcome::Diverged { error, .. } => Err(error),
            _ => Ok(self),
        }
    }
}
