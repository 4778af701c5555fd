use dbmi_migrate::MigrationStatus;

use crate::GlobalOpts;

pub async fn run(opts: &GlobalOpts) -> anyhow::Result<()> {
    let migrator = super::connect(opts).await?;
    let rows = migrator.status().await;
    migrator.close().await;
    let rows = rows?;

    if rows.is_empty() {
        println!("No migrations found in {}", migrator.store().dir().display());
        return Ok(());
    }

    let width = rows.iter().map(|r| r.identifier.len()).max().unwrap_or(0);
    let mut pending = 0;
    for row in &rows {
        let state = match &row.status {
            MigrationStatus::Pending => {
                pending += 1;
                "pending".to_string()
            }
            MigrationStatus::Applied { applied_at, .. } => {
                format!("applied   {}", applied_at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            MigrationStatus::Orphaned { applied_at, .. } => format!(
                "orphaned  {} (file missing)",
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        };
        println!("{:<width$}  {}", row.identifier, state, width = width);
    }

    println!();
    println!("{} migration(s), {} pending", rows.len(), pending);
    Ok(())
}
