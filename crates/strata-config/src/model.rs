use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DIALECT_VERSION: &str = "7.0";

/// Top-level configuration, usually read from `strata.yml` or `strata.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    /// Schema convention version migrations are written against, e.g. "7.0".
    pub schema_dialect_version: String,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            migrations: MigrationsConfig::default(),
            schema_dialect_version: DEFAULT_DIALECT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Milliseconds to wait for a lock held by another runner.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/development.sqlite3"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    /// Bookkeeping table name.
    pub table: String,
    /// Run the bundled migrations instead of reading `directory`.
    pub builtin: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("db/migrate"),
            table: "schema_migrations".to_string(),
            builtin: false,
        }
    }
}
