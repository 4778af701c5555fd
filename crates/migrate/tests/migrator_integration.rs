//! Integration tests for batch migration runs
//!
//! Every test runs the full engine (store, ledger, planner, applier) against
//! SQLite with migration files written to a temporary directory.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dbmi_migrate::backends::SqliteBackend;
use dbmi_migrate::{
    BatchOutcome, CancellationToken, MigrationBackend, MigrationCount, MigrationDirection,
    MigrationError, MigrationStatus, Migrator, MigratorConfig, PoolConfig,
};
use tempfile::TempDir;

const LONG_RUNNING: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 10000000) \
     SELECT count(*) FROM c;";

struct Fixture {
    dir: TempDir,
    backend: Arc<dyn MigrationBackend>,
    /// Generous timeout; used for setup and for inspecting the ledger
    setup: Migrator,
    migrator: Migrator,
}

impl Fixture {
    async fn memory() -> Self {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn MigrationBackend> = Arc::new(
            SqliteBackend::connect("sqlite::memory:", &PoolConfig::default())
                .await
                .unwrap(),
        );
        Self::with_backend(dir, backend, Duration::from_secs(5)).await
    }

    /// File-backed database, so a stuck connection does not block the others
    async fn on_disk(timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let backend: Arc<dyn MigrationBackend> = Arc::new(
            SqliteBackend::connect(&url, &PoolConfig::default())
                .await
                .unwrap(),
        );
        Self::with_backend(dir, backend, timeout).await
    }

    async fn with_backend(
        dir: TempDir,
        backend: Arc<dyn MigrationBackend>,
        timeout: Duration,
    ) -> Self {
        let setup = Migrator::new(
            backend.clone(),
            &Self::config(&dir).with_statement_timeout(Duration::from_secs(30)),
        );
        setup.init().await.unwrap();

        let migrator = Migrator::new(
            backend.clone(),
            &Self::config(&dir).with_statement_timeout(timeout),
        );
        Self {
            dir,
            backend,
            setup,
            migrator,
        }
    }

    fn config(dir: &TempDir) -> MigratorConfig {
        MigratorConfig::new("sqlite::memory:").with_migrations_dir(dir.path().join("migrations"))
    }

    fn write(&self, name: &str, up: &str, down: &str) -> PathBuf {
        let path = self.dir.path().join("migrations").join(name);
        fs::write(&path, format!("{}\n/*DOWN*/\n{}\n", up, down)).unwrap();
        path
    }

    async fn table_exists(&self, table: &str) -> bool {
        self.backend
            .execute(&format!("SELECT 1 FROM {}", table), &[])
            .await
            .is_ok()
    }

    async fn ledger(&self) -> Vec<String> {
        self.setup
            .ledger()
            .applied_identifiers(0, false)
            .await
            .unwrap()
    }

    async fn up(&self, count: MigrationCount) -> dbmi_migrate::BatchReport {
        self.migrator
            .migrate(MigrationDirection::Up, count, &CancellationToken::new())
            .await
            .unwrap()
    }

    async fn down(&self, count: MigrationCount) -> dbmi_migrate::BatchReport {
        self.migrator
            .migrate(MigrationDirection::Down, count, &CancellationToken::new())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_up_down_up_round_trip() {
    let fx = Fixture::memory().await;
    fx.write("1000_create_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_create_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");

    let report = fx.up(MigrationCount::All).await;
    assert!(report.is_success());
    assert_eq!(report.completed, vec!["1000_create_a.sql", "2000_create_b.sql"]);
    assert_eq!(fx.ledger().await, vec!["1000_create_a.sql", "2000_create_b.sql"]);
    assert!(fx.table_exists("a").await && fx.table_exists("b").await);

    let report = fx.down(MigrationCount::Limit(1)).await;
    assert_eq!(report.completed, vec!["2000_create_b.sql"]);
    assert_eq!(fx.ledger().await, vec!["1000_create_a.sql"]);
    assert!(fx.table_exists("a").await);
    assert!(!fx.table_exists("b").await);

    let report = fx.up(MigrationCount::All).await;
    assert_eq!(report.completed, vec!["2000_create_b.sql"]);
    assert!(fx.table_exists("b").await);
}

#[tokio::test]
async fn test_second_up_is_a_no_op() {
    let fx = Fixture::memory().await;
    fx.write("1000_create_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");

    fx.up(MigrationCount::All).await;
    let report = fx.up(MigrationCount::All).await;

    assert!(matches!(report.outcome, BatchOutcome::NothingToDo));
    assert!(report.is_success());
    assert!(report.completed.is_empty());
    assert_eq!(fx.ledger().await, vec!["1000_create_a.sql"]);
}

#[tokio::test]
async fn test_up_respects_count() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    fx.write("3000_c.sql", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let report = fx.up(MigrationCount::Limit(2)).await;
    assert_eq!(report.planned, vec!["1000_a.sql", "2000_b.sql"]);
    assert_eq!(report.completed.len(), 2);
    assert!(!fx.table_exists("c").await);
}

#[tokio::test]
async fn test_failure_halts_batch_and_keeps_earlier_work() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER); INSERT INTO missing VALUES (1);", "");
    fx.write("3000_c.sql", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let report = fx.up(MigrationCount::All).await;

    assert!(!report.is_success());
    assert_eq!(report.completed, vec!["1000_a.sql"]);
    match &report.outcome {
        BatchOutcome::Halted { identifier, error } => {
            assert_eq!(identifier, "2000_b.sql");
            assert!(matches!(error, MigrationError::Script { .. }));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(fx.ledger().await, vec!["1000_a.sql"]);
    assert!(fx.table_exists("a").await);
    assert!(!fx.table_exists("b").await);
    assert!(!fx.table_exists("c").await);
}

#[tokio::test]
async fn test_down_reverts_most_recent_first() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    fx.write("3000_c.sql", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");
    fx.up(MigrationCount::All).await;

    let report = fx.down(MigrationCount::All).await;
    assert!(report.is_success());
    assert_eq!(report.completed, vec!["3000_c.sql", "2000_b.sql", "1000_a.sql"]);
    assert!(fx.ledger().await.is_empty());
}

#[tokio::test]
async fn test_down_on_empty_ledger() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");

    let report = fx.down(MigrationCount::Limit(1)).await;
    assert!(matches!(report.outcome, BatchOutcome::NothingToDo));
}

#[tokio::test]
async fn test_down_with_missing_file_halts() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    let b = fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    fx.up(MigrationCount::All).await;
    fs::remove_file(b).unwrap();

    let report = fx.down(MigrationCount::Limit(2)).await;

    assert!(report.completed.is_empty());
    match &report.outcome {
        BatchOutcome::Halted { identifier, error } => {
            assert_eq!(identifier, "2000_b.sql");
            assert!(matches!(error, MigrationError::MissingFile { .. }));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(fx.ledger().await, vec!["1000_a.sql", "2000_b.sql"]);
    assert!(fx.table_exists("a").await);
}

#[tokio::test]
async fn test_down_with_unparseable_file_reports_parse_error() {
    let fx = Fixture::memory().await;
    let a = fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.up(MigrationCount::All).await;
    // Separator lost in an edit; the file itself is still there
    fs::write(&a, "CREATE TABLE a (id INTEGER);\nDROP TABLE a;\n").unwrap();

    let report = fx.down(MigrationCount::Limit(1)).await;

    assert!(report.completed.is_empty());
    match &report.outcome {
        BatchOutcome::Halted { identifier, error } => {
            assert_eq!(identifier, "1000_a.sql");
            match error {
                MigrationError::Parse { path, reason } => {
                    assert_eq!(path, &a);
                    assert!(reason.contains("/*DOWN*/"));
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(fx.ledger().await, vec!["1000_a.sql"]);
    assert!(fx.table_exists("a").await);
}

#[tokio::test]
async fn test_down_follows_application_order_not_file_names() {
    let fx = Fixture::memory().await;
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    fx.up(MigrationCount::All).await;
    // An older-named file that arrives later is applied after 2000_b
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    let report = fx.up(MigrationCount::All).await;
    assert_eq!(report.completed, vec!["1000_a.sql"]);
    assert_eq!(fx.ledger().await, vec!["2000_b.sql", "1000_a.sql"]);

    let report = fx.down(MigrationCount::Limit(1)).await;

    assert_eq!(report.completed, vec!["1000_a.sql"]);
    assert_eq!(fx.ledger().await, vec!["2000_b.sql"]);
    assert!(!fx.table_exists("a").await);
    assert!(fx.table_exists("b").await);
}

#[tokio::test]
async fn test_ledger_failure_reports_divergence() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_break_ledger.sql", "DROP TABLE migrations;", "");
    fx.write("3000_c.sql", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let report = fx.up(MigrationCount::All).await;

    assert_eq!(report.completed, vec!["1000_a.sql"]);
    match &report.outcome {
        BatchOutcome::Diverged { identifier, error } => {
            assert_eq!(identifier, "2000_break_ledger.sql");
            assert!(error.is_divergence());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(
        report.into_result(),
        Err(MigrationError::Divergence { .. })
    ));
    // The whole transaction was rolled back, ledger table included
    assert_eq!(fx.ledger().await, vec!["1000_a.sql"]);
    assert!(!fx.table_exists("c").await);
}

#[tokio::test]
async fn test_script_timeout_halts_batch() {
    let fx = Fixture::on_disk(Duration::from_millis(200)).await;
    fx.write("1000_slow.sql", LONG_RUNNING, "");
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");

    let report = fx.up(MigrationCount::All).await;

    match &report.outcome {
        BatchOutcome::Halted { identifier, error } => {
            assert_eq!(identifier, "1000_slow.sql");
            assert!(matches!(error, MigrationError::Script { .. }));
            assert!(error.to_string().contains("timed out"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(report.completed.is_empty());
    assert!(fx.ledger().await.is_empty());
}

#[tokio::test]
async fn test_cancellation_before_start() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");

    let token = CancellationToken::new();
    token.cancel();
    let report = fx
        .migrator
        .migrate(MigrationDirection::Up, MigrationCount::All, &token)
        .await
        .unwrap();

    assert!(matches!(
        report.error(),
        Some(MigrationError::Cancelled { .. })
    ));
    assert!(fx.ledger().await.is_empty());
    assert!(!fx.table_exists("a").await);
}

#[tokio::test]
async fn test_cancellation_during_script() {
    let fx = Fixture::on_disk(Duration::from_secs(30)).await;
    fx.write("1000_slow.sql", LONG_RUNNING, "");

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = fx
        .migrator
        .migrate(MigrationDirection::Up, MigrationCount::All, &token)
        .await
        .unwrap();

    assert!(matches!(
        report.error(),
        Some(MigrationError::Cancelled { identifier }) if identifier == "1000_slow.sql"
    ));
    assert!(report.completed.is_empty());
}

#[tokio::test]
async fn test_status_reports_pending_applied_and_orphaned() {
    let fx = Fixture::memory().await;
    let a = fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fx.write("2000_b.sql", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    fx.up(MigrationCount::Limit(1)).await;
    fs::remove_file(a).unwrap();
    fx.write("3000_c.sql", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let rows = fx.migrator.status().await.unwrap();
    let summary: Vec<(&str, &str)> = rows
        .iter()
        .map(|row| {
            let state = match row.status {
                MigrationStatus::Pending => "pending",
                MigrationStatus::Applied { .. } => "applied",
                MigrationStatus::Orphaned { .. } => "orphaned",
            };
            (row.identifier.as_str(), state)
        })
        .collect();

    assert_eq!(
        summary,
        vec![
            ("2000_b.sql", "pending"),
            ("3000_c.sql", "pending"),
            ("1000_a.sql", "orphaned"),
        ]
    );
}

#[tokio::test]
async fn test_invalid_files_are_skipped_unless_strict() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    fs::write(
        fx.dir.path().join("migrations").join("1500_broken.sql"),
        "CREATE TABLE broken (id INTEGER);",
    )
    .unwrap();

    let plan = fx
        .migrator
        .plan(MigrationDirection::Up, MigrationCount::All)
        .await
        .unwrap();
    assert_eq!(plan.identifiers(), vec!["1000_a.sql"]);
    assert_eq!(plan.invalid.len(), 1);

    let strict = Migrator::new(fx.backend.clone(), &Fixture::config(&fx.dir)).with_strict(true);
    let result = strict
        .migrate(MigrationDirection::Up, MigrationCount::All, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(MigrationError::Parse { .. })));
    assert!(fx.ledger().await.is_empty());

    let report = fx.up(MigrationCount::All).await;
    assert_eq!(report.completed, vec!["1000_a.sql"]);
    assert!(!fx.table_exists("broken").await);
}

#[tokio::test]
async fn test_plan_does_not_execute() {
    let fx = Fixture::memory().await;
    fx.write("1000_a.sql", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");

    let plan = fx
        .migrator
        .plan(MigrationDirection::Up, MigrationCount::All)
        .await
        .unwrap();

    assert_eq!(plan.identifiers(), vec!["1000_a.sql"]);
    assert!(fx.ledger().await.is_empty());
    assert!(!fx.table_exists("a").await);
}

#[tokio::test]
async fn test_created_template_applies_cleanly() {
    let fx = Fixture::memory().await;
    let path = fx.migrator.create("Add users table").unwrap();
    let identifier = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(identifier.ends_with("_Add_users_table.sql"));

    let report = fx.up(MigrationCount::All).await;
    assert_eq!(report.completed, vec![identifier.clone()]);

    let report = fx.down(MigrationCount::Limit(1)).await;
    assert_eq!(report.completed, vec![identifier]);
}
