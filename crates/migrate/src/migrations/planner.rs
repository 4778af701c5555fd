//! Migration Planner - reconciles the migration directory with the ledger
//!
//! Up plans are the files the ledger has never seen, oldest first. Down plans
//! are the most recently applied ledger entries, newest first, each matched
//! back to its file on disk.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::definitions::{
    LedgerEntry, MigrationCount, MigrationDirection, MigrationFile, MigrationStatus,
};
use super::ledger::Ledger;
use super::store::MigrationStore;
use crate::error::{MigrationError, MigrationResult};

/// What a plan step found on disk for its identifier
#[derive(Debug, Clone)]
pub enum StepFile {
    Parsed(MigrationFile),
    /// The file is there but has no usable `/*DOWN*/` split
    Unparseable { path: PathBuf, reason: String },
    /// A down plan names a ledger entry whose file is gone
    Missing,
}

/// One step of a plan
#[derive(Debug, Clone)]
pub struct PlannedMigration {
    pub identifier: String,
    pub file: StepFile,
}

impl PlannedMigration {
    /// The file to execute, or the error that halts the batch at this step
    pub fn require_file(&self) -> MigrationResult<&MigrationFile> {
        match &self.file {
            StepFile::Parsed(file) => Ok(file),
            StepFile::Unparseable { path, reason } => {
                Err(MigrationError::parse(path.clone(), reason.clone()))
            }
            StepFile::Missing => Err(MigrationError::MissingFile {
                identifier: self.identifier.clone(),
            }),
        }
    }
}

/// Ordered work for one batch
#[derive(Debug)]
pub struct MigrationPlan {
    pub direction: MigrationDirection,
    pub steps: Vec<PlannedMigration>,
    /// Files skipped because they could not be parsed
    pub invalid: Vec<MigrationError>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.identifier.clone()).collect()
    }
}

/// A migration and its reconciled state, as shown by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub identifier: String,
    pub status: MigrationStatus,
}

/// Computes plans from a store and a ledger
pub struct Planner {
    store: MigrationStore,
    ledger: Arc<Ledger>,
}

impl Planner {
    pub fn new(store: MigrationStore, ledger: Arc<Ledger>) -> Self {
        Self { store, ledger }
    }

    /// Plan a batch in `direction`, touching at most `count` migrations
    pub async fn plan(
        &self,
        direction: MigrationDirection,
        count: MigrationCount,
    ) -> MigrationResult<MigrationPlan> {
        let scan = self.store.scan()?;

        let steps = match direction {
            MigrationDirection::Up => {
                let applied = self.ledger.applied_identifiers(0, false).await?;
                pending(scan.files, &applied, count)
                    .into_iter()
                    .map(|file| PlannedMigration {
                        identifier: file.identifier.clone(),
                        file: StepFile::Parsed(file),
                    })
                    .collect()
            }
            MigrationDirection::Down => {
                let recent = self
                    .ledger
                    .applied_identifiers(count.as_limit(), true)
                    .await?;
                rollback_steps(recent, scan.files, &scan.invalid)
            }
        };

        tracing::debug!(
            direction = %direction,
            planned = steps.len(),
            invalid = scan.invalid.len(),
            "Migration plan computed"
        );

        Ok(MigrationPlan {
            direction,
            steps,
            invalid: scan.invalid,
        })
    }

    /// Every known migration with its state: files ascending, then orphaned ledger entries
    pub async fn status(&self) -> MigrationResult<Vec<StatusRow>> {
        let files = self.store.list()?;
        let entries = self.ledger.entries(0, false).await?;
        Ok(reconcile_status(&files, entries))
    }
}

/// Files not in `applied`, ascending by identifier, truncated to `count`
pub fn pending(
    mut files: Vec<MigrationFile>,
    applied: &[String],
    count: MigrationCount,
) -> Vec<MigrationFile> {
    let applied: HashSet<&str> = applied.iter().map(String::as_str).collect();
    files.retain(|f| !applied.contains(f.identifier.as_str()));
    files.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    files.truncate(count.clamp(files.len()));
    files
}

/// Match ledger identifiers (already newest first) to their files.
///
/// An identifier with no parsed file falls back to the scan's parse
/// diagnostics, so a broken file is reported as such rather than as missing.
pub fn rollback_steps(
    recent: Vec<String>,
    files: Vec<MigrationFile>,
    invalid: &[MigrationError],
) -> Vec<PlannedMigration> {
    let mut by_id: HashMap<String, MigrationFile> = files
        .into_iter()
        .map(|f| (f.identifier.clone(), f))
        .collect();

    let unparseable: HashMap<String, (&PathBuf, &String)> = invalid
        .iter()
        .filter_map(|e| match e {
            MigrationError::Parse { path, reason } => {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some((name, (path, reason)))
            }
            _ => None,
        })
        .collect();

    recent
        .into_iter()
        .map(|identifier| {
            let file = match by_id.remove(&identifier) {
                Some(file) => StepFile::Parsed(file),
                None => match unparseable.get(&identifier) {
                    Some((path, reason)) => StepFile::Unparseable {
                        path: (*path).clone(),
                        reason: (*reason).clone(),
                    },
                    None => StepFile::Missing,
                },
            };
            PlannedMigration { identifier, file }
        })
        .collect()
}

pub fn reconcile_status(files: &[MigrationFile], entries: Vec<LedgerEntry>) -> Vec<StatusRow> {
    let mut applied: HashMap<String, LedgerEntry> = entries
        .into_iter()
        .map(|e| (e.identifier.clone(), e))
        .collect();

    let mut rows: Vec<StatusRow> = files
        .iter()
        .map(|file| {
            let status = match applied.remove(&file.identifier) {
                Some(entry) => MigrationStatus::Applied {
                    applied_at: entry.applied_at,
                    sequence_id: entry.sequence_id,
                },
                None => MigrationStatus::Pending,
            };
            StatusRow {
                identifier: file.identifier.clone(),
                status,
            }
        })
        .collect();

    let mut orphans: Vec<LedgerEntry> = applied.into_values().collect();
    orphans.sort_by_key(|e| e.sequence_id);
    rows.extend(orphans.into_iter().map(|entry| StatusRow {
        identifier: entry.identifier,
        status: MigrationStatus::Orphaned {
            applied_at: entry.applied_at,
            sequence_id: entry.sequence_id,
        },
    }));

    rows
}
