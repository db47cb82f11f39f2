use crate::error::{MeterError, Result};
use crate::supervisor::RunOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The config directory name under the platform config dir.
const CONFIG_DIR_NAME: &str = "procmeter";

/// The filename for the configuration file.
const CONFIG_FILENAME: &str = "config.toml";

// ============================================================================
// Run Defaults
// ============================================================================

/// Defaults applied to every measured run.
///
/// Missing fields in a config file fall back to the defaults below, so a
/// partial file is valid.
///
/// # Example
///
/// ```toml
/// # Delay between two resource samples, in milliseconds
/// poll_interval_ms = 200
///
/// # Kill the subject after this many seconds
/// max_time_secs = 3600
///
/// # Restrict the subject to CPUs 0 and 1
/// affinity_mask = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_time_secs")]
    pub max_time_secs: u64,

    /// Bit *i* allows logical CPU *i*. Absent means no restriction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_mask: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_time_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_time_secs: default_max_time_secs(),
            affinity_mask: None,
        }
    }
}

impl Config {
    /// Converts into supervisor options. Call [`validate_config`] first.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_time: Duration::from_secs(self.max_time_secs),
            affinity_mask: self.affinity_mask,
        }
    }
}

// ============================================================================
// Config Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A zero poll interval would spin the sampling thread.
    ZeroPollInterval,
    /// A zero time limit would kill every subject immediately.
    ZeroMaxTime,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPollInterval => {
                write!(f, "`poll_interval_ms` must be greater than zero")
            }
            ConfigError::ZeroMaxTime => write!(f, "`max_time_secs` must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Checks a configuration before it is turned into [`RunOptions`].
pub fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.poll_interval_ms == 0 {
        return Err(ConfigError::ZeroPollInterval);
    }
    if config.max_time_secs == 0 {
        return Err(ConfigError::ZeroMaxTime);
    }
    Ok(())
}

// ============================================================================
// Config File Management
// ============================================================================

/// Path of the default config file (`<config_dir>/procmeter/config.toml`).
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| MeterError::Config("Could not determine config directory".into()))?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}

/// Loads and validates the config at `path`.
///
/// A missing file yields [`Config::default`].
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate_config(&config).map_err(|e| MeterError::Config(e.to_string()))?;
    Ok(config)
}

/// Loads `explicit` if given, otherwise the default config file.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) if !path.exists() => Err(MeterError::Config(format!(
            "Config file not found: {}",
            path.display()
        ))),
        Some(path) => load_config_from(path),
        None => load_config_from(&default_config_path()?),
    }
}
