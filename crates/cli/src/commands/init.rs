use crate::GlobalOpts;

pub async fn run(opts: &GlobalOpts) -> anyhow::Result<()> {
    let migrator = super::connect(opts).await?;
    let report = migrator.init().await;
    migrator.close().await;
    let report = report?;

    let dir = migrator.store().dir().display();
    if report.created_dir {
        println!("Created migration directory {}", dir);
    } else {
        println!("Migration directory {} already exists", dir);
    }
    println!("Ledger table \"{}\" is ready", migrator.ledger().table_name());
    Ok(())
}
