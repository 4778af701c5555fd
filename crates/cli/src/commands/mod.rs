pub mod config;
pub mod exampleconf;
pub mod init;
pub mod migrate;
pub mod new;
pub mod status;
pub mod version;

use std::time::Duration;

use anyhow::Context;
use dbmi_migrate::{MigratorConfig, Migrator};

use crate::GlobalOpts;

/// Read the config file, apply environment and command-line overrides, validate
pub fn load_config(opts: &GlobalOpts) -> anyhow::Result<MigratorConfig> {
    let mut config = MigratorConfig::from_file(&opts.config).with_context(|| {
        format!(
            "could not load {} (run `dbmi exampleconf` for a template)",
            opts.config.display()
        )
    })?;
    config.apply_env();

    if let Some(secs) = opts.timeout {
        config = config.with_statement_timeout(Duration::from_secs(secs));
    }

    config.validate()?;
    Ok(config)
}

/// Load the configuration and connect to its database
pub async fn connect(opts: &GlobalOpts) -> anyhow::Result<Migrator> {
    let config = load_config(opts)?;
    Ok(Migrator::connect(&config).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn opts(dir: &TempDir, timeout: Option<u64>) -> GlobalOpts {
        GlobalOpts {
            config: dir.path().join("dbm.conf.json"),
            timeout,
        }
    }

    #[test]
    fn test_load_config_applies_timeout_override() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("dbm.conf.json"),
            r#"{"db_connection": "sqlite::memory:", "db_statement_timeout_secs": 5}"#,
        )
        .unwrap();

        let config = load_config(&opts(&dir, Some(12))).unwrap();
        assert_eq!(config.statement_timeout, Duration::from_secs(12));

        assert!(load_config(&opts(&dir, Some(0))).is_err());
    }

    #[test]
    fn test_load_config_missing_file_mentions_exampleconf() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&opts(&dir, None)).unwrap_err();
        assert!(format!("{:#}", err).contains("exampleconf"));
    }
}
