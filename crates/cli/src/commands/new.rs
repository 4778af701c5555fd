use anyhow::Context;
use chrono::Utc;
use dbmi_migrate::config::DEFAULT_MIGRATIONS_DIR;
use dbmi_migrate::{MigrationStore, MigratorConfig};

use crate::GlobalOpts;

/// Creating a file needs no database, so a missing config file falls back to defaults
pub fn run(opts: &GlobalOpts, name: &str) -> anyhow::Result<()> {
    let dir = if opts.config.exists() {
        let mut config = MigratorConfig::from_file(&opts.config)?;
        config.apply_env();
        config.migrations_dir
    } else {
        std::env::var("DBMI_FOLDER")
            .unwrap_or_else(|_| DEFAULT_MIGRATIONS_DIR.to_string())
            .into()
    };

    let store = MigrationStore::new(dir);
    let path = store
        .create(name, Utc::now())
        .with_context(|| format!("could not create migration '{}'", name))?;

    println!("Created {}", path.display());
    Ok(())
}
