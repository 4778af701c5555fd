//! # Structured Logging
//!
//! `tracing` subscriber setup for migration runs, with plain text or JSON
//! output. Logs go to stderr so command output on stdout stays pipeable.

use serde_json::json;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::migrations::{BatchOutcome, BatchReport};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    /// Keeps sqlx's per-statement logs out of the way unless `RUST_LOG` asks for them
    fn filter_directive(&self) -> String {
        format!("{},sqlx=warn", self.level)
    }
}

/// Initialize logging. `RUST_LOG`, when set, overrides the configured filter.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.filter_directive()))?;

    let json_layer = config.json_format.then(|| {
        Layer::new()
            .with_writer(io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .json()
    });
    let text_layer = (!config.json_format).then(|| {
        Layer::new()
            .with_writer(io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    tracing::debug!(
        target: "dbmi::logging",
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}

/// Emit one structured summary event for a finished batch
pub fn log_batch_report(report: &BatchReport) {
    let mut summary = json!({
        "event": "migration_batch",
        "direction": report.direction,
        "planned": report.planned.len(),
        "completed": report.completed,
        "duration_ms": report.execution_time_ms,
    });

    match &report.outcome {
        BatchOutcome::NothingToDo | BatchOutcome::Completed => {
            summary["outcome"] = json!("completed");
            tracing::info!(target: "dbmi::batch", "{}", summary);
        }
        BatchOutcome::Halted { identifier, error } => {
            summary["outcome"] = json!("halted");
            summary["failed"] = json!(identifier);
            summary["error"] = json!(error.to_string());
            tracing::error!(target: "dbmi::batch", "{}", summary);
        }
        BatchOutcome::Diverged { identifier, error } => {
            summary["outcome"] = json!("diverged");
            summary["failed"] = json!(identifier);
            summary["error"] = json!(error.to_string());
            tracing::error!(target: "dbmi::batch", "{}", summary);
        }
    }
}
