use crate::config::{
    redact, ConfigError, ConfigSource, ConfigValidator, DatabaseUrlValidator, TableNameValidator,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `-c` is not given
pub const DEFAULT_CONFIG_FILE: &str = "dbm.conf.json";
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";
pub const DEFAULT_TABLE_NAME: &str = "migrations";
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const EXAMPLE_CONFIG: &str = r#"{
	"db_connection": "postgres://<user>:<pass>@<host>/<yourdbname>?sslmode=disable",
	"db_dbmi_folder": "./migrations",
	"db_dbmi_tablename": "db_migrations",
	"db_statement_timeout_secs": 5
}
"#;

/// On-disk shape of the JSON config file
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    db_connection: Option<String>,
    db_dbmi_folder: Option<PathBuf>,
    db_dbmi_tablename: Option<String>,
    db_statement_timeout_secs: Option<u64>,
    db_max_connections: Option<u32>,
}

/// Resolved, validated configuration handed to the engine
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub connection_string: String,
    pub migrations_dir: PathBuf,
    pub table_name: String,
    pub statement_timeout: Duration,
    pub max_connections: u32,
    sources: BTreeMap<&'static str, ConfigSource>,
}

impl MigratorConfig {
    /// Configuration with defaults for everything but the connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert("db_connection", ConfigSource::Override);
        sources.insert("db_dbmi_folder", ConfigSource::Default);
        sources.insert("db_dbmi_tablename", ConfigSource::Default);
        sources.insert("db_statement_timeout_secs", ConfigSource::Default);
        sources.insert("db_max_connections", ConfigSource::Default);

        Self {
            connection_string: connection_string.into(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sources,
        }
    }

    /// Load the config file, apply environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Read the JSON config file; keys it omits keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: display.clone(),
            source,
        })?;

        let mut config = Self::new(String::new());
        config
            .sources
            .insert("db_connection", ConfigSource::Default);

        let from_file = ConfigSource::File(path.to_path_buf());
        if let Some(connection) = file.db_connection {
            config.connection_string = connection;
            config.sources.insert("db_connection", from_file.clone());
        }
        if let Some(folder) = file.db_dbmi_folder {
            config.migrations_dir = folder;
            config.sources.insert("db_dbmi_folder", from_file.clone());
        }
        if let Some(table) = file.db_dbmi_tablename {
            config.table_name = table;
            config.sources.insert("db_dbmi_tablename", from_file.clone());
        }
        if let Some(secs) = file.db_statement_timeout_secs {
            config.statement_timeout = Duration::from_secs(secs);
            config
                .sources
                .insert("db_statement_timeout_secs", from_file.clone());
        }
        if let Some(max) = file.db_max_connections {
            config.max_connections = max;
            config.sources.insert("db_max_connections", from_file);
        }

        Ok(config)
    }

    /// Apply `DATABASE_URL`, `DBMI_FOLDER` and `DBMI_TABLE` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.connection_string = url;
            self.sources
                .insert("db_connection", ConfigSource::Env("DATABASE_URL"));
        }
        if let Some(folder) = lookup("DBMI_FOLDER") {
            self.migrations_dir = PathBuf::from(folder);
            self.sources
                .insert("db_dbmi_folder", ConfigSource::Env("DBMI_FOLDER"));
        }
        if let Some(table) = lookup("DBMI_TABLE") {
            self.table_name = table;
            self.sources
                .insert("db_dbmi_tablename", ConfigSource::Env("DBMI_TABLE"));
        }
    }

    /// Override the statement timeout (CLI `--timeout`)
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self.sources
            .insert("db_statement_timeout_secs", ConfigSource::Override);
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self.sources.insert("db_dbmi_folder", ConfigSource::Override);
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self.sources
            .insert("db_dbmi_tablename", ConfigSource::Override);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        DatabaseUrlValidator::default().validate(self.connection_string.as_str())?;
        TableNameValidator::default().validate(self.table_name.as_str())?;

        if self.statement_timeout.is_zero() {
            return Err(ConfigError::invalid_value(
                "db_statement_timeout_secs",
                "0",
                "a timeout of at least one second",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "db_max_connections",
                "0",
                "at least one connection",
            ));
        }

        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::missing_required(
                "db_dbmi_folder",
                "Point it at the directory holding the .sql migration files",
            ));
        }

        Ok(())
    }

    /// Where each resolved value came from, keyed by config file field name
    pub fn config_sources(&self) -> &BTreeMap<&'static str, ConfigSource> {
        &self.sources
    }

    /// Connection string with any password masked, for display
    pub fn redacted_connection(&self) -> String {
        redact(&self.connection_string)
    }

    /// Text printed by `dbmi exampleconf`
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("dbm.conf.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_file_values_and_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"db_connection": "postgres://u:p@localhost/app", "db_dbmi_tablename": "db_migrations"}"#,
        );

        let config = MigratorConfig::from_file(&path).unwrap();
        assert_eq!(config.connection_string, "postgres://u:p@localhost/app");
        assert_eq!(config.table_name, "db_migrations");
        assert_eq!(config.migrations_dir, PathBuf::from(DEFAULT_MIGRATIONS_DIR));
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());

        let sources = config.config_sources();
        assert!(matches!(sources["db_connection"], ConfigSource::File(_)));
        assert!(matches!(sources["db_dbmi_tablename"], ConfigSource::File(_)));
        assert!(matches!(sources["db_dbmi_folder"], ConfigSource::Default));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = MigratorConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{ not json");
        assert!(matches!(
            MigratorConfig::from_file(&path),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn test_missing_connection_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"db_dbmi_folder": "./db"}"#);
        let config = MigratorConfig::from_file(&path).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"db_connection": "postgres://localhost/app"}"#);
        let mut config = MigratorConfig::from_file(&path).unwrap();

        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite::memory:"),
            ("DBMI_TABLE", "schema_log"),
        ]
        .into_iter()
        .collect();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection_string, "sqlite::memory:");
        assert_eq!(config.table_name, "schema_log");
        assert!(matches!(config.config_sources()["db_connection"], ConfigSource::Env("DATABASE_URL")));
        assert!(matches!(config.config_sources()["db_dbmi_folder"], ConfigSource::Default));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"db_connection": "postgres://localhost/app"}"#);

        env::set_var("DBMI_FOLDER", "./other_migrations");
        let config = MigratorConfig::load(&path);
        env::remove_var("DBMI_FOLDER");

        let config = config.unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("./other_migrations"));
    }

    #[test]
    fn test_rejects_unsafe_table_name_and_zero_timeout() {
        let config = MigratorConfig::new("sqlite::memory:").with_table_name("x; DROP TABLE y");
        assert!(config.validate().is_err());

        let config =
            MigratorConfig::new("sqlite::memory:").with_statement_timeout(Duration::from_secs(0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_example_config_parses() {
        let file: ConfigFile = serde_json::from_str(MigratorConfig::example()).unwrap();
        assert_eq!(file.db_dbmi_tablename.as_deref(), Some("db_migrations"));
        assert!(file.db_connection.unwrap().starts_with("postgres://"));
    }
}
