use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::StrataConfig;

/// File names looked for, in order, when no config path is given.
const CANDIDATES: &[&str] = &["strata.yml", "strata.yaml", "strata.toml"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file, choosing the format from its extension.
    pub fn load(path: &Path) -> Result<StrataConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<StrataConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Find the first known config file in `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Load `explicit` if given (it must exist), otherwise the first config
    /// file discovered in `dir`, otherwise defaults.
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<StrataConfig> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::discover(dir) {
            Some(path) => Self::load(&path),
            None => {
                debug!("no config file in {}, using defaults", dir.display());
                Ok(StrataConfig::default())
            }
        }
    }
}
