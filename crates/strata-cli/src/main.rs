mod banner;
mod commands;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(
    about = "Apply, revert, and inspect ordered schema migrations",
    long_about = "Strata applies versioned schema migrations to a SQLite database, one \
                  transaction per migration, and records each applied version in a \
                  bookkeeping table so that every migration runs exactly once."
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    /// Config file (defaults to strata.yml, strata.yaml, or strata.toml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "STRATA_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Directory of <version>_<name>.up.sql / .down.sql files
    #[arg(long, env = "STRATA_MIGRATIONS", global = true)]
    pub migrations: Option<PathBuf>,

    /// Use the bundled create_accounts / create_articles migrations
    #[arg(long, global = true)]
    pub builtin: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Stop after applying this version
        #[arg(long)]
        to: Option<i64>,
    },

    /// Revert the most recently applied migrations
    Rollback {
        /// How many migrations to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Revert and re-apply the most recent migration
    Redo,

    /// Show every migration and whether it is applied
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List migrations that have not been applied
    Pending,

    /// Show the live columns, foreign keys, and indexes of a table
    Describe {
        table: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create an empty, timestamped up/down migration pair
    New {
        /// Migration name in snake_case, e.g. create_articles
        name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,strata=debug,strata_db=debug,strata_config=debug"
    } else {
        "warn,strata=info,strata_db=info,strata_config=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    // a missing .env is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = Settings::resolve(&cli).and_then(|settings| commands::run(cli.command, &settings));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
