//! # Configuration Management
//!
//! This module handles loading and validating configuration from the
//! balance-config.toml file. All runtime settings (which balance, which port, how often
//! to poll, how to average) live in one [`Config`] value that is built at startup and
//! passed to the components that need it.

use crate::mode::Mode;
use crate::output::OutputFormat;
use crate::poller::{PollerSettings, MIN_FAILURE_LIMIT};
use crate::protocol::Model;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "balance-config.toml";

/// Problems that stop the program before polling starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config IO: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config file format: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config encode: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Application configuration loaded from balance-config.toml
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Balance, serial port and polling settings
    pub main: MainConfig,
    /// Flow calculation settings (hydro mode only)
    pub hydro: HydroConfig,
    /// Output log settings
    pub output: OutputConfig,
}

/// Balance connection and polling configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MainConfig {
    /// "log" for raw masses, "hydro" for flow rates
    pub mode: Mode,
    /// Balance vendor: "denver", "mettler" or "simulated"
    pub model: Model,
    /// Serial device, e.g. "/dev/ttyS0" or "COM3"
    pub port: String,
    pub baud: u32,
    /// Seconds between weight requests
    pub update_interval: u64,
    /// Serial read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Consecutive failed polls before giving up; 0 retries forever, 1 is rejected
    pub max_consecutive_failures: u32,
}

/// Hydraulic conductance flow configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HydroConfig {
    /// Update intervals spanned by one rate sample
    pub flow_interval: usize,
    /// Rate samples in the running average
    #[serde(alias = "average_N")]
    pub average_n: usize,
}

/// Output log configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the log file is created in
    pub directory: PathBuf,
    /// Log file name; a timestamped name is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub format: OutputFormat,
    /// Free-text tag written on every log-mode line (sample or stem id)
    pub label: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        MainConfig {
            mode: Mode::Hydro,
            model: Model::Mettler,
            port: "/dev/ttyS0".to_string(),
            baud: 9600,
            update_interval: 5,
            read_timeout_ms: 2000,
            max_consecutive_failures: 12,
        }
    }
}

impl Default for HydroConfig {
    fn default() -> Self {
        HydroConfig {
            flow_interval: 1,
            average_n: 4,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: PathBuf::from("."),
            file: None,
            format: OutputFormat::Tsv,
            label: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from balance-config.toml
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load and validate configuration from `path`.
    /// A missing file yields the defaults; a file that exists but does not parse or
    /// validate is an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents)?;
                log::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(
                    "No config file at {}, using default configuration",
                    path.display()
                );
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Reject settings the poll loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.main.model != Model::Simulated && self.main.port.trim().is_empty() {
            return invalid("main.port", "a serial port is required");
        }
        if self.main.baud == 0 {
            return invalid("main.baud", "must be greater than zero");
        }
        if self.main.update_interval == 0 {
            return invalid("main.update_interval", "must be at least one second");
        }
        if self.main.read_timeout_ms == 0 {
            return invalid("main.read_timeout_ms", "must be greater than zero");
        }
        if self.main.max_consecutive_failures != 0
            && self.main.max_consecutive_failures < MIN_FAILURE_LIMIT
        {
            return invalid(
                "main.max_consecutive_failures",
                "must be 0 (retry forever) or at least 2",
            );
        }
        if self.hydro.flow_interval == 0 {
            return invalid("hydro.flow_interval", "must be at least one");
        }
        if self.hydro.average_n == 0 {
            return invalid("hydro.average_n", "must be at least one");
        }

        if self.read_timeout() >= self.interval() {
            log::warn!(
                "Read timeout {} ms is not shorter than the {} s update interval; ticks will be skipped",
                self.main.read_timeout_ms,
                self.main.update_interval
            );
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.main.update_interval)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.main.read_timeout_ms)
    }

    pub fn flow_interval(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.hydro.flow_interval).ok_or(ConfigError::Invalid {
            field: "hydro.flow_interval",
            reason: "must be at least one".to_string(),
        })
    }

    pub fn average_n(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.hydro.average_n).ok_or(ConfigError::Invalid {
            field: "hydro.average_n",
            reason: "must be at least one".to_string(),
        })
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            model: self.main.model,
            interval: self.interval(),
            max_consecutive_failures: self.main.max_consecutive_failures,
        }
    }

    /// Output log path; `default_name` is used when no file name is configured.
    pub fn output_path(&self, default_name: &str) -> PathBuf {
        let name = self.output.file.as_deref().unwrap_or(default_name);
        self.output.directory.join(name)
    }
}
