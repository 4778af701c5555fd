use dbmi_migrate::{
    log_batch_report, BatchOutcome, BatchReport, CancellationToken, MigrationCount,
    MigrationDirection, MigrationPlan, Migrator, StepFile,
};

use crate::GlobalOpts;

pub struct MigrateArgs {
    pub direction: MigrationDirection,
    pub count: Option<i64>,
    pub dry_run: bool,
    pub strict: bool,
}

impl MigrateArgs {
    /// Up defaults to every pending migration, down to the most recent one
    pub fn migration_count(&self) -> MigrationCount {
        match (self.count, self.direction) {
            (Some(n), _) => MigrationCount::from_limit(n),
            (None, MigrationDirection::Up) => MigrationCount::All,
            (None, MigrationDirection::Down) => MigrationCount::Limit(1),
        }
    }
}

pub async fn run(opts: &GlobalOpts, args: MigrateArgs) -> anyhow::Result<()> {
    let migrator = super::connect(opts).await?.with_strict(args.strict);
    let result = execute(&migrator, &args).await;
    migrator.close().await;
    result
}

async fn execute(migrator: &Migrator, args: &MigrateArgs) -> anyhow::Result<()> {
    let count = args.migration_count();

    if args.dry_run {
        let plan = migrator.plan(args.direction, count).await?;
        print_plan(&plan);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current migration rolls back");
            on_signal.cancel();
        }
    });

    let report = migrator.migrate(args.direction, count, &cancel).await;
    watcher.abort();

    let report = report?;
    log_batch_report(&report);
    print_report(&report);
    report.into_result()?;
    Ok(())
}

fn print_plan(plan: &MigrationPlan) {
    for problem in &plan.invalid {
        println!("skipping: {}", problem);
    }
    if plan.is_empty() {
        println!("Nothing to migrate {}", plan.direction);
        return;
    }

    println!("Would migrate {} {} migration(s):", plan.direction, plan.steps.len());
    for step in &plan.steps {
        match &step.file {
            StepFile::Parsed(_) => println!("  {}", step.identifier),
            StepFile::Unparseable { reason, .. } => {
                println!("  {}  (unparseable: {}, will halt)", step.identifier, reason)
            }
            StepFile::Missing => println!("  {}  (file missing, will halt)", step.identifier),
        }
    }
}

fn print_report(report: &BatchReport) {
    for identifier in &report.completed {
        println!("{} {}", report.direction, identifier);
    }

    match &report.outcome {
        BatchOutcome::NothingToDo => println!("Nothing to migrate {}", report.direction),
        BatchOutcome::Completed => println!(
            "Migrated {} {} migration(s) in {}ms",
            report.direction,
            report.completed.len(),
            report.execution_time_ms
        ),
        BatchOutcome::Halted { identifier, .. } => println!(
            "Applied {} of {} migration(s); halted at {}",
            report.completed.len(),
            report.planned.len(),
            identifier
        ),
        BatchOutcome::Diverged { identifier, .. } => println!(
            "Applied {} of {} migration(s); {} left the ledger out of step with the schema, manual review required",
            report.completed.len(),
            report.planned.len(),
            identifier
        ),
    }
}
