//! Migration Store - File system operations for migrations
//!
//! Enumerates `.sql` files under the migration directory, parses each into an
//! up-script and a down-script, and creates new timestamped migration files.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::definitions::{MigrationFile, MIGRATION_EXTENSION, MIGRATION_SEPARATOR};
use crate::error::{MigrationError, MigrationResult};

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("slug regex is valid"));

/// Everything found in one directory scan
#[derive(Debug, Default)]
pub struct StoreScan {
    /// Valid migrations, ascending by identifier
    pub files: Vec<MigrationFile>,
    /// One `Parse` error per file that cannot be executed
    pub invalid: Vec<MigrationError>,
}

/// Reads and creates migration files in one directory
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Valid migrations ascending by identifier; invalid files are logged and left out
    pub fn list(&self) -> MigrationResult<Vec<MigrationFile>> {
        let scan = self.scan()?;
        for problem in &scan.invalid {
            tracing::warn!(error = %problem, "Skipping migration file");
        }
        Ok(scan.files)
    }

    /// Walk the directory tree, separating valid migrations from unparseable ones.
    ///
    /// An absent directory yields an empty scan; any other read failure is an `Io` error.
    pub fn scan(&self) -> MigrationResult<StoreScan> {
        if !self.dir.exists() {
            tracing::debug!(dir = %self.dir.display(), "Migration directory does not exist yet");
            return Ok(StoreScan::default());
        }

        let mut paths = Vec::new();
        collect_sql_files(&self.dir, &mut paths)?;

        let mut scan = StoreScan::default();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for path in paths {
            match Self::parse_file(&path) {
                Ok(file) => {
                    if let Some(first) = seen.get(&file.identifier) {
                        scan.invalid.push(MigrationError::parse(
                            &path,
                            format!("duplicate identifier, already defined by {}", first.display()),
                        ));
                        continue;
                    }
                    seen.insert(file.identifier.clone(), path.clone());
                    scan.files.push(file);
                }
                Err(e @ MigrationError::Parse { .. }) => scan.invalid.push(e),
                Err(e) => return Err(e),
            }
        }

        scan.files.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(scan)
    }

    /// Look up one migration by identifier
    pub fn find(&self, identifier: &str) -> MigrationResult<Option<MigrationFile>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|file| file.identifier == identifier))
    }

    /// Parse one migration file; the identifier is the file's base name
    pub fn parse_file(path: &Path) -> MigrationResult<MigrationFile> {
        let identifier = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrationError::parse(path, "file name is not valid UTF-8"))?
            .to_string();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(MigrationError::parse(path, "content is not valid UTF-8"));
            }
            Err(e) => return Err(MigrationError::io(path, e)),
        };

        let (up_script, down_script) =
            parse_content(&content).map_err(|reason| MigrationError::parse(path, reason))?;

        Ok(MigrationFile {
            identifier,
            up_script,
            down_script,
            path: path.to_path_buf(),
        })
    }

    /// Create the migration directory if absent
    pub fn ensure_dir(&self) -> MigrationResult<bool> {
        if self.dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).map_err(|e| MigrationError::io(&self.dir, e))?;
        tracing::info!(dir = %self.dir.display(), "Created migration directory");
        Ok(true)
    }

    /// Create `<unix-timestamp>_<slug>.sql` from the template and return its path
    pub fn create(&self, name: &str, now: DateTime<Utc>) -> MigrationResult<PathBuf> {
        let slug = slugify(name);
        if slug.trim_matches('_').is_empty() {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        self.ensure_dir()?;

        let filename = format!("{}_{}.{}", now.timestamp(), slug, MIGRATION_EXTENSION);
        let path = self.dir.join(&filename);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| MigrationError::io(&path, e))?;
        file.write_all(migration_template().as_bytes())
            .map_err(|e| MigrationError::io(&path, e))?;

        tracing::info!(path = %path.display(), "Created migration");
        Ok(path)
    }
}

/// Split file content on the separator into (up, down)
pub fn parse_content(content: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = content.split(MIGRATION_SEPARATOR).collect();
    match parts.len() {
        2 => Ok((parts[0].trim().to_string(), parts[1].trim().to_string())),
        1 => Err(format!("missing {} separator", MIGRATION_SEPARATOR)),
        n => Err(format!(
            "{} separator appears {} times, expected once",
            MIGRATION_SEPARATOR,
            n - 1
        )),
    }
}

/// Replace every run of non-word characters with `_`
pub fn slugify(name: &str) -> String {
    NON_WORD.replace_all(name, "_").into_owned()
}

/// Body of a freshly created migration file
pub fn migration_template() -> String {
    format!(
        "-- put your up-migration here.\n\n{}\n-- put your down-migration here.\n\n",
        MIGRATION_SEPARATOR
    )
}

/// Whether a script holds anything besides whitespace and `--` comments
pub fn has_statements(script: &str) -> bool {
    script.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with("--")
    })
}

fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> MigrationResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| MigrationError::io(dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| MigrationError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| MigrationError::io(&path, e))?;

        if file_type.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path
            .extension()
            .map_or(false, |ext| ext == MIGRATION_EXTENSION)
        {
            out.push(path);
        }
    }

    Ok(())
}
