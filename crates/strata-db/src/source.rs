use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use strata_common::{Error, Result};
use tracing::debug;

use crate::migrations::{Migration, SchemaChange};

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<version>\d+)_(?P<name>[A-Za-z0-9_]+?)(?P<kind>\.up\.sql|\.down\.sql|\.sql)$")
        .expect("migration file pattern is valid")
});

static MIGRATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("migration name pattern is valid"));

#[derive(Default)]
struct Pending {
    name: String,
    up: Option<String>,
    down: Option<String>,
}

/// Loads SQL migrations from a directory.
///
/// Recognised files are `<version>_<name>.up.sql` with an optional
/// `<version>_<name>.down.sql`, or `<version>_<name>.sql` for a forward-only
/// migration. Anything else in the directory is ignored.
pub struct MigrationSource;

impl MigrationSource {
    pub fn from_dir(dir: &Path) -> Result<Vec<Migration>> {
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "migrations directory not found: {}",
                dir.display()
            )));
        }

        let mut by_version: BTreeMap<i64, Pending> = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            let Some(caps) = FILE_NAME.captures(file_name) else {
                debug!("ignoring {}", path.display());
                continue;
            };

            let version: i64 = caps["version"].parse().map_err(|_| {
                Error::Config(format!("migration version out of range: {file_name}"))
            })?;
            let name = &caps["name"];
            let sql = std::fs::read_to_string(&path)?;

            let pending = by_version.entry(version).or_default();
            if pending.name.is_empty() {
                pending.name = name.to_string();
            } else if pending.name != name {
                return Err(Error::Config(format!(
                    "migration {version} has files with different names: {} and {name}",
                    pending.name
                )));
            }

            let slot = match &caps["kind"] {
                ".down.sql" => &mut pending.down,
                _ => &mut pending.up,
            };
            if slot.replace(sql).is_some() {
                return Err(Error::DuplicateVersion(version));
            }
        }

        let mut migrations = Vec::with_capacity(by_version.len());
        for (version, pending) in by_version {
            let Some(up) = pending.up else {
                return Err(Error::Config(format!(
                    "migration {version}_{} has a down file but no up file",
                    pending.name
                )));
            };
            let mut migration = Migration::new(version, pending.name, vec![SchemaChange::Sql(up)]);
            if let Some(down) = pending.down {
                migration = migration.with_down(vec![SchemaChange::Sql(down)]);
            }
            migrations.push(migration);
        }

        debug!("loaded {} migrations from {}", migrations.len(), dir.display());
        Ok(migrations)
    }

    /// Create an empty up/down pair versioned by `now`, returning both paths.
    pub fn scaffold(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<(PathBuf, PathBuf)> {
        if !MIGRATION_NAME.is_match(name) {
            return Err(Error::Config(format!(
                "migration name must be lowercase snake_case: {name:?}"
            )));
        }

        std::fs::create_dir_all(dir)?;
        let version = now.format("%Y%m%d%H%M%S").to_string();
        let taken = Self::from_dir(dir)?
            .iter()
            .any(|m| m.version().to_string() == version);
        if taken {
            return Err(Error::Config(format!(
                "a migration with version {version} already exists"
            )));
        }

        let up = dir.join(format!("{version}_{name}.up.sql"));
        let down = dir.join(format!("{version}_{name}.down.sql"));
        std::fs::write(&up, format!("-- {name}: forward action\n"))?;
        std::fs::write(&down, format!("-- {name}: reverse action\n"))?;
        Ok((up, down))
    }
}
