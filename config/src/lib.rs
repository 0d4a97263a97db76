//! Yolk configuration file.
//!
//! ```toml
//! [ghci]
//! command = "stack ghci --ghci-options=-ddump-json"
//!
//! [log]
//! level = "debug"
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use yolk_lsp::GhciConfig;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "YOLK_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct YolkConfig {
    pub ghci: Option<GhciConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl YolkConfig {
    /// Load the config file. `Ok(None)` when there is none.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// GHCi settings, falling back to the built-in command.
    #[must_use]
    pub fn ghci(&self) -> GhciConfig {
        self.ghci.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        self.log
            .as_ref()
            .and_then(|log| log.level.as_deref())
            .map(str::trim)
            .filter(|level| !level.is_empty())
    }
}

/// `$YOLK_CONFIG`, else `~/.yolk/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    resolve_config_path(std::env::var_os(CONFIG_ENV))
}

fn resolve_config_path(override_path: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    yolk_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.yolk`, home of the default config file and the log directory.
pub fn yolk_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".yolk"))
}
