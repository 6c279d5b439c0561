use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR_NAME: &str = "querydeck";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_consecutive_poll_failures: u32,
    pub page_size: usize,
    pub push_reconnect_delay_ms: u64,
    /// Rows mounted above and below the visible result window.
    pub overscan: usize,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_poll_attempts: 600,
            max_consecutive_poll_failures: 3,
            page_size: 200,
            push_reconnect_delay_ms: 2_000,
            overscan: 8,
        }
    }
}

impl WorkbenchConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("poll_interval_ms", self.poll_interval_ms == 0),
            ("max_poll_attempts", self.max_poll_attempts == 0),
            (
                "max_consecutive_poll_failures",
                self.max_consecutive_poll_failures == 0,
            ),
            ("page_size", self.page_size == 0),
        ];
        for (field, is_zero) in positive {
            if is_zero {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Locations of every file the workbench reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resolve_default() -> Result<Self, ConfigError> {
        Ok(Self::new(default_config_dir()?))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    #[must_use]
    pub fn datasources_file(&self) -> PathBuf {
        self.dir.join("datasources.toml")
    }

    #[must_use]
    pub fn tabs_file(&self) -> PathBuf {
        self.dir.join("tabs.toml")
    }

    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.dir.join("history.ndjson")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.dir.join("querydeck.log")
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("QUERYDECK_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join(APP_DIR_NAME))
}
