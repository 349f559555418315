//! Configuration — where the data lives and which chains commands see.
//!
//! User-level config: `~/.chains/config.yaml`
//!
//! Data directory resolution: `--dir` flag → `CHAINS_DATA_DIR` env var →
//! `data_dir` in the config file → `~/.chains/data` → `./.chains`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::catalog::Filter;

pub const DATA_DIR_ENV: &str = "CHAINS_DATA_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Filter applied to positional indices when `--filter` is not given.
    #[serde(default)]
    pub default_filter: Filter,
}

/// Path to `~/.chains/`.
fn dirs_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|p| PathBuf::from(p).join(".chains"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME")
            .ok()
            .map(|p| PathBuf::from(p).join(".chains"))
    }
}

impl Config {
    /// Load `~/.chains/config.yaml`, or defaults if it is missing.
    pub fn load() -> Self {
        match dirs_path() {
            Some(dir) => Self::load_from(&dir.join("config.yaml")),
            None => Self::default(),
        }
    }

    /// Load a config file. Missing or unparseable files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_yaml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("ignoring {}: {e}", path.display());
            Self::default()
        })
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Resolve the data directory, `flag` first.
    pub fn data_dir(&self, flag: Option<&Path>) -> PathBuf {
        let env = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        self.resolve_data_dir(flag, env)
    }

    fn resolve_data_dir(&self, flag: Option<&Path>, env: Option<PathBuf>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or(env)
            .or_else(|| self.data_dir.clone())
            .or_else(|| dirs_path().map(|d| d.join("data")))
            .unwrap_or_else(|| PathBuf::from(".chains"))
    }
}
