use anyhow::{Context, Result, bail};
use chrono::Utc;
use strata_db::{Migration, MigrationRunner, MigrationSource};
use tracing::{info, warn};

use crate::Commands;
use crate::banner::{render_status, render_table};
use crate::settings::Settings;

pub fn run(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::New { name } => new_migration(settings, &name),
        Commands::Migrate { to } => {
            let runner = open_runner(settings)?;
            let applied = match to {
                Some(target) => runner.apply_to(target),
                None => runner.apply_all(),
            }
            .context("migrate failed")?;
            println!("applied {applied} migration{}", plural(applied));
            Ok(())
        }
        Commands::Rollback { steps } => {
            let runner = open_runner(settings)?;
            let reverted = if steps == 1 {
                vec![runner.revert_last().context("rollback failed")?]
            } else {
                runner.revert(steps).context("rollback failed")?
            };
            if reverted.is_empty() {
                println!("nothing to roll back");
            }
            for migration in reverted {
                println!("reverted {} {}", migration.version(), migration.name());
            }
            Ok(())
        }
        Commands::Redo => {
            let runner = open_runner(settings)?;
            let migration = runner.redo().context("redo failed")?;
            println!("redid {} {}", migration.version(), migration.name());
            Ok(())
        }
        Commands::Status { json } => {
            let runner = open_runner(settings)?;
            let statuses = runner.status().context("failed to read migration status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                println!(
                    "{}",
                    render_status(settings.database(), runner.dialect(), &statuses)
                );
            }
            Ok(())
        }
        Commands::Pending => {
            let runner = open_runner(settings)?;
            let pending = runner.pending().context("failed to compute pending migrations")?;
            if pending.is_empty() {
                println!("schema is up to date");
            }
            for migration in pending {
                println!("{} {}", migration.version(), migration.name());
            }
            Ok(())
        }
        Commands::Describe { table, json } => {
            let runner = open_runner(settings)?;
            let Some(description) = runner.describe(&table)? else {
                bail!("table {table} does not exist");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&description)?);
            } else {
                println!("{}", render_table(&description));
            }
            Ok(())
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn load_migrations(settings: &Settings) -> Result<Vec<Migration>> {
    if settings.builtin {
        info!("using built-in migrations");
        return Ok(strata_db::migrations::builtin());
    }
    MigrationSource::from_dir(&settings.migrations_dir).with_context(|| {
        format!(
            "failed to load migrations from {} (pass --builtin to use the bundled ones)",
            settings.migrations_dir.display()
        )
    })
}

fn open_runner(settings: &Settings) -> Result<MigrationRunner> {
    let migrations = load_migrations(settings)?;

    if let Some(parent) = settings.database().parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create database directory {}: {e}", parent.display());
            }
        }
    }

    MigrationRunner::open(settings.database(), migrations, settings.runner.clone())
        .with_context(|| format!("failed to open {}", settings.database().display()))
}

fn new_migration(settings: &Settings, name: &str) -> Result<()> {
    let (up, down) = MigrationSource::scaffold(&settings.migrations_dir, name, Utc::now())
        .context("failed to create migration")?;
    println!("created {}", up.display());
    println!("created {}", down.display());
    Ok(())
}
