use crate::GlobalOpts;

pub fn run(opts: &GlobalOpts) -> anyhow::Result<()> {
    let config = super::load_config(opts)?;

    println!("db_connection:             {}", config.redacted_connection());
    println!("db_dbmi_folder:            {}", config.migrations_dir.display());
    println!("db_dbmi_tablename:         {}", config.table_name);
    println!(
        "db_statement_timeout_secs: {}",
        config.statement_timeout.as_secs()
    );
    println!("db_max_connections:        {}", config.max_connections);

    println!();
    println!("Sources:");
    for (key, source) in config.config_sources() {
        println!("  {:<26} {}", key, source);
    }
    Ok(())
}
