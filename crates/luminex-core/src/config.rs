//! Worker configuration.
//!
//! ## Learning: Serde for Serialization
//!
//! Serde is Rust's standard for serialization/deserialization.
//! The `#[derive(Deserialize)]` macro generates code to read
//! structs from JSON, TOML, etc.
//!
//! `#[serde(default)]` uses Default::default() for missing fields,
//! making configs backward-compatible.
//!
//! ```toml
//! [workers.analysis]
//! interval_ms = 10000
//! stop_when_idle = { after_ms = 60000 }
//!
//! [workers.formatter]
//! stop_when_idle = "never"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default idle-check interval.
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// Default idle time after which a worker is stopped.
pub const DEFAULT_STOP_WHEN_IDLE_MS: u64 = 120_000;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker settings keyed by worker label
    pub workers: HashMap<String, WorkerSettings>,
}

impl Config {
    /// Loads config from the default location.
    pub fn load() -> Self {
        match Self::load_from_default_path() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Falling back to default config: {}", e);
                Self::default()
            }
        }
    }

    /// Loads config from a file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads from the default config path.
    fn load_from_default_path() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("luminex").join("config.toml"))
    }

    /// Returns settings for a worker label, or the defaults.
    pub fn worker(&self, label: &str) -> WorkerSettings {
        self.workers.get(label).cloned().unwrap_or_default()
    }
}

/// Lifecycle settings for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// How often to check whether the worker is idle (ms)
    pub interval_ms: u64,

    /// When to stop an idle worker
    pub stop_when_idle: IdleLimit,
}

impl WorkerSettings {
    /// Returns the idle-check interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            stop_when_idle: IdleLimit::default(),
        }
    }
}

/// Idle threshold for stopping a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleLimit {
    /// Never stop the worker
    Never,
    /// Stop after this many idle milliseconds
    AfterMs(u64),
}

impl IdleLimit {
    /// Returns the threshold, or `None` when the worker never stops.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            IdleLimit::Never => None,
            IdleLimit::AfterMs(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for IdleLimit {
    fn default() -> Self {
        Self::AfterMs(DEFAULT_STOP_WHEN_IDLE_MS)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config directory not found")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Config::default().worker("analysis");
        assert_eq!(settings.interval(), Duration::from_secs(30));
        assert_eq!(
            settings.stop_when_idle.as_duration(),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_parse_worker_table() {
        let config: Config = toml::from_str(
            r#"
            [workers.analysis]
            interval_ms = 5
            stop_when_idle = { after_ms = 20 }

            [workers.formatter]
            stop_when_idle = "never"
            "#,
        )
        .unwrap();

        let analysis = config.worker("analysis");
        assert_eq!(analysis.interval_ms, 5);
        assert_eq!(analysis.stop_when_idle, IdleLimit::AfterMs(20));

        let formatter = config.worker("formatter");
        assert_eq!(formatter.interval_ms, DEFAULT_INTERVAL_MS);
        assert_eq!(formatter.stop_when_idle.as_duration(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[workers.analysis]\ninterval_ms = 100\nstop_when_idle = \"never\"\n",
        )
        .unwrap();

        let settings = Config::load_from(&path).unwrap().worker("analysis");
        assert_eq!(settings.interval(), Duration::from_millis(100));
        assert_eq!(settings.stop_when_idle, IdleLimit::Never);
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = 3").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
