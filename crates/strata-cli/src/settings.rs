use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use strata_config::{ConfigLoader, StrataConfig};
use strata_db::{RunnerConfig, SchemaDialect};

use crate::Cli;

/// Config file values with command-line and environment overrides applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: PathBuf,
    pub migrations_dir: PathBuf,
    pub builtin: bool,
    pub runner: RunnerConfig,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to read working directory")?;
        let config = ConfigLoader::resolve(cli.config.as_deref(), &cwd)
            .context("failed to load configuration")?;
        Self::merge(cli, config)
    }

    fn merge(cli: &Cli, config: StrataConfig) -> Result<Self> {
        let dialect: SchemaDialect = config
            .schema_dialect_version
            .parse()
            .context("schema_dialect_version")?;

        Ok(Self {
            database: cli.database.clone().unwrap_or(config.database.path),
            migrations_dir: cli
                .migrations
                .clone()
                .unwrap_or(config.migrations.directory),
            builtin: cli.builtin || config.migrations.builtin,
            runner: RunnerConfig {
                dialect,
                table: config.migrations.table,
                busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
            },
        })
    }

    pub fn database(&self) -> &Path {
        &self.database
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::try_parse_from([
            "strata",
            "--database",
            "/tmp/override.db",
            "--builtin",
            "status",
        ])
        .unwrap();
        let mut config = StrataConfig::default();
        config.database.busy_timeout_ms = 100;
        config.migrations.table = "versions".to_string();

        let settings = Settings::merge(&cli, config).unwrap();
        assert_eq!(settings.database(), Path::new("/tmp/override.db"));
        assert_eq!(settings.migrations_dir, PathBuf::from("db/migrate"));
        assert!(settings.builtin);
        assert_eq!(settings.runner.table, "versions");
        assert_eq!(settings.runner.busy_timeout, Duration::from_millis(100));
        assert_eq!(settings.runner.dialect, SchemaDialect::CURRENT);
    }

    #[test]
    fn malformed_dialect_is_rejected() {
        let cli = Cli::try_parse_from(["strata", "pending"]).unwrap();
        let config = StrataConfig {
            schema_dialect_version: "latest".to_string(),
            ..StrataConfig::default()
        };
        assert!(Settings::merge(&cli, config).is_err());
    }
}
