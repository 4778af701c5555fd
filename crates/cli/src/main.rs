mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use dbmi_migrate::config::DEFAULT_CONFIG_FILE;
use dbmi_migrate::{init_logging, ErrorKind, LoggingConfig, MigrationDirection, MigrationError};

use commands::*;

#[derive(Parser)]
#[command(name = "dbmi")]
#[command(about = "Apply and revert plain SQL migrations")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Per-statement timeout in seconds, overriding the config file
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration directory and the ledger table
    Init,

    /// Create a new, empty migration file
    New {
        /// Migration name; anything but letters, digits and underscores becomes `_`
        name: String,
    },

    /// Apply (up) or revert (down) migrations
    Migrate {
        /// Direction: up or down
        direction: MigrationDirection,

        /// How many migrations to touch; 0 means all. Defaults to all for up, 1 for down.
        #[arg(allow_negative_numbers = true)]
        count: Option<i64>,

        /// Print the plan without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Refuse to run while any migration file is malformed
        #[arg(long)]
        strict: bool,
    },

    /// Show every migration and whether it is applied
    Status,

    /// Print an example config file
    Exampleconf,

    /// Print the dbmi version
    Version,

    /// Show the resolved configuration and where each value came from
    Config,
}

/// Options shared by every command that touches the database
pub struct GlobalOpts {
    pub config: PathBuf,
    pub timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::default()
        .with_level(cli.log_level.clone())
        .with_json(cli.log_format == LogFormat::Json);
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let opts = GlobalOpts {
        config: cli.config,
        timeout: cli.timeout,
    };

    let result = match cli.command {
        Commands::Init => init::run(&opts).await,
        Commands::New { name } => new::run(&opts, &name),
        Commands::Migrate {
            direction,
            count,
            dry_run,
            strict,
        } => {
            migrate::run(
                &opts,
                migrate::MigrateArgs {
                    direction,
                    count,
                    dry_run,
                    strict,
                },
            )
            .await
        }
        Commands::Status => status::run(&opts).await,
        Commands::Exampleconf => {
            exampleconf::run();
            Ok(())
        }
        Commands::Version => {
            version::run();
            Ok(())
        }
        Commands::Config => config::run(&opts),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 2 for a failed or cancelled migration, 3 for a ledger divergence, 1 for anything else
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrationError>().map(MigrationError::kind) {
        Some(ErrorKind::Divergence) => 3,
        Some(ErrorKind::Script | ErrorKind::MissingFile | ErrorKind::Cancelled) => 2,
        _ => 1,
    }
}
