//! Error types for the migration engine
//!
//! Every failure carries enough context (identifier, direction, database
//! message) to diagnose a halted batch without re-running it.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::migrations::definitions::MigrationDirection;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Unreadable or malformed configuration; no database contact was attempted
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The migration directory (or a file in it) could not be read or written
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration file does not follow the `<up>/*DOWN*/<down>` layout
    #[error("Invalid migration file '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// A migration name that slugifies to nothing
    #[error("Invalid migration name '{0}': it must contain at least one letter, digit or underscore")]
    InvalidName(String),

    /// A migration script failed; prior migrations in the batch stand
    #[error("Migration {identifier} ({direction}) failed: {message}")]
    Script {
        identifier: String,
        direction: MigrationDirection,
        message: String,
    },

    /// The script ran but the ledger could not be updated to match
    #[error("Migration {identifier} ({direction}) diverged from the ledger, manual review required: {message}")]
    Divergence {
        identifier: String,
        direction: MigrationDirection,
        message: String,
    },

    /// A down-migration was requested for a ledger entry whose file is gone
    #[error("Migration file not found for applied migration: {identifier}")]
    MissingFile { identifier: String },

    /// The ledger already holds this identifier
    #[error("Migration {identifier} is already recorded in the ledger")]
    Conflict { identifier: String },

    /// The ledger does not hold this identifier
    #[error("Migration {identifier} is not recorded in the ledger")]
    NotFound { identifier: String },

    /// The batch was cancelled before this migration committed
    #[error("Migration {identifier} was cancelled before commit")]
    Cancelled { identifier: String },

    /// Any other database failure (ledger reads, DDL)
    #[error("Database error: {0}")]
    Database(String),
}

/// Coarse classification of a [`MigrationError`], used for exit codes and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    Io,
    Parse,
    InvalidName,
    Script,
    Divergence,
    MissingFile,
    Conflict,
    NotFound,
    Cancelled,
    Database,
}

impl MigrationError {
    /// Create an IO error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for the given file
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a script error
    pub fn script(
        identifier: impl Into<String>,
        direction: MigrationDirection,
        message: impl Into<String>,
    ) -> Self {
        Self::Script {
            identifier: identifier.into(),
            direction,
            message: message.into(),
        }
    }

    /// Create a divergence error
    pub fn divergence(
        identifier: impl Into<String>,
        direction: MigrationDirection,
        message: impl Into<String>,
    ) -> Self {
        Self::Divergence {
            identifier: identifier.into(),
            direction,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Config(_) => ErrorKind::Config,
            MigrationError::Connection(_) => ErrorKind::Connection,
            MigrationError::Io { .. } => ErrorKind::Io,
            MigrationError::Parse { .. } => ErrorKind::Parse,
            MigrationError::InvalidName(_) => ErrorKind::InvalidName,
            MigrationError::Script { .. } => ErrorKind::Script,
            MigrationError::Divergence { .. } => ErrorKind::Divergence,
            MigrationError::MissingFile { .. } => ErrorKind::MissingFile,
            MigrationError::Conflict { .. } => ErrorKind::Conflict,
            MigrationError::NotFound { .. } => ErrorKind::NotFound,
            MigrationError::Cancelled { .. } => ErrorKind::Cancelled,
            MigrationError::Database(_) => ErrorKind::Database,
        }
    }

    /// Whether the error leaves script state and ledger state disagreeing
    pub fn is_divergence(&self) -> bool {
        matches!(self, MigrationError::Divergence { .. })
    }

    /// Identifier of the migration the error concerns, when there is one
    pub fn identifier(&self) -> Option<&str> {
        match self {
            MigrationError::Script { identifier, .. }
            | MigrationError::Divergence { identifier, .. }
            | MigrationError::MissingFile { identifier }
            | MigrationError::Conflict { identifier }
            | MigrationError::NotFound { identifier }
            | MigrationError::Cancelled { identifier } => Some(identifier),
            _ => None,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}
