use dbmi_migrate::MigratorConfig;

pub fn run() {
    print!("{}", MigratorConfig::example());
}
