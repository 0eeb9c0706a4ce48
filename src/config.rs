//! # Daemon Configuration
//!
//! Loaded once at startup from a TOML file and immutable afterwards.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! listen = "[::1]:8888"
//!
//! [intern]
//! api_app = "juggler"
//! api_key = "secret"
//! api_uri = "https://intern.example.com/api"
//! printer_name = "mk3"
//! office_name = "lab"
//!
//! [paths]
//! device_signal_file = "/tmp/gizmostatusfile"
//!
//! [timing]
//! polling_interval_secs = 15
//! button_wait_secs = 600
//! ```
//!
//! Everything except the `[intern]` identity has a default.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub intern: InternConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub feeder: FeederConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            intern: InternConfig::default(),
            paths: PathsConfig::default(),
            feeder: FeederConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Remote job-queue identity and credentials.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InternConfig {
    #[serde(default)]
    pub api_app: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_uri: String,
    #[serde(default)]
    pub printer_name: String,
    #[serde(default)]
    pub office_name: String,
    /// Skip TLS certificate verification for the queue endpoint.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Files shared with the feeder and the device-side agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_device_signal_file")]
    pub device_signal_file: PathBuf,
    #[serde(default = "default_button_file")]
    pub button_file: PathBuf,
    #[serde(default = "default_job_file")]
    pub job_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            device_signal_file: default_device_signal_file(),
            button_file: default_button_file(),
            job_file: default_job_file(),
        }
    }
}

/// Serial device the payload is streamed to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeederConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// How long to wait for the printer to acknowledge a single line.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,
    #[serde(default = "default_button_wait_secs")]
    pub button_wait_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval_secs(),
            button_wait_secs: default_button_wait_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn button_wait(&self) -> Duration {
        Duration::from_secs(self.button_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intern.api_uri.trim().is_empty() {
            return Err(ConfigError::Invalid("intern.api_uri must be set".to_string()));
        }
        if self.intern.printer_name.trim().is_empty() {
            return Err(ConfigError::Invalid("intern.printer_name must be set".to_string()));
        }
        if self.intern.office_name.trim().is_empty() {
            return Err(ConfigError::Invalid("intern.office_name must be set".to_string()));
        }
        if self.timing.polling_interval_secs == 0 {
            return Err(ConfigError::Invalid("timing.polling_interval_secs must be > 0".to_string()));
        }
        if self.timing.button_wait_secs == 0 {
            return Err(ConfigError::Invalid("timing.button_wait_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_listen() -> String { "[::1]:8888".to_string() }
fn default_device_signal_file() -> PathBuf { PathBuf::from("/tmp/gizmostatusfile") }
fn default_button_file() -> PathBuf { PathBuf::from("/tmp/buttonpress") }
fn default_job_file() -> PathBuf { PathBuf::from("/tmp/job") }
fn default_device() -> String { "/dev/ttyACM0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_response_timeout_ms() -> u64 { 120_000 }
fn default_polling_interval_secs() -> u64 { 15 }
fn default_button_wait_secs() -> u64 { 600 }
fn default_request_timeout_secs() -> u64 { 30 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
