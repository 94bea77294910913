//! Layered configuration using Figment
//!
//! Configuration is merged from, in increasing priority:
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. A TOML file (`config/scope_daq.toml` unless another path is given)
//! 3. Environment variables prefixed with `SCOPE_DAQ_`, nested with `__`
//! 4. Command-line overrides ([`Overrides`])
//!
//! # Example
//! ```no_run
//! use scope_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Retry budget: {}", config.acquisition.retry_budget);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::logging::OutputFormat;
use daq_driver_rigol::block::{DEFAULT_DRAIN_TIMEOUT, MAX_PAYLOAD_BYTES};
use daq_driver_rigol::transport::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, DEFAULT_PORT,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/scope_daq.toml";

/// Prefix for environment overrides, e.g. `SCOPE_DAQ_ACQUISITION__RETRY_BUDGET=3`
pub const ENV_PREFIX: &str = "SCOPE_DAQ_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument connection settings
    pub instrument: InstrumentConfig,
    /// Acquisition loop settings
    pub acquisition: AcquisitionConfig,
    /// Output settings
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "scope_daq".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Instrument connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument host name or address
    pub host: Option<String>,
    /// Raw-socket SCPI port
    pub port: u16,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout applied to every socket read and write
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            nodelay: true,
        }
    }
}

impl InstrumentConfig {
    /// Socket options for [`Transport::connect`](daq_driver_rigol::Transport::connect).
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            nodelay: self.nodelay,
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Attempts per channel per waveform cycle
    pub retry_budget: u32,
    /// Number of waveform cycles to run (unbounded when absent)
    pub waveform_limit: Option<u64>,
    /// Largest block payload accepted, sizes the receive buffer
    pub max_payload_bytes: usize,
    /// Give up waiting for the trigger to stop after this long (wait forever when absent)
    #[serde(with = "humantime_serde")]
    pub trigger_timeout: Option<Duration>,
    /// Optional ceiling on trigger status polls per cycle
    pub max_trigger_polls: Option<u64>,
    /// Pause between trigger status polls
    #[serde(with = "humantime_serde")]
    pub trigger_poll_interval: Duration,
    /// How long the resync drain waits after a bad terminator
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            retry_budget: 10,
            waveform_limit: None,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            trigger_timeout: None,
            max_trigger_polls: None,
            trigger_poll_interval: Duration::ZERO,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Append every successful payload to this file
    pub raw_dump: Option<PathBuf>,
}

/// Command-line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Instrument host
    pub host: Option<String>,
    /// Instrument port
    pub port: Option<u16>,
    /// Waveform count
    pub waveform_limit: Option<u64>,
    /// Raw dump path
    pub raw_dump: Option<PathBuf>,
    /// Retry budget
    pub retry_budget: Option<u32>,
    /// Log level
    pub log_level: Option<String>,
    /// Log format
    pub log_format: Option<OutputFormat>,
}

impl AppConfig {
    /// Load configuration from `config/scope_daq.toml` and the environment
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.instrument.host = Some(host);
        }
        if let Some(port) = overrides.port {
            self.instrument.port = port;
        }
        if let Some(limit) = overrides.waveform_limit {
            self.acquisition.waveform_limit = Some(limit);
        }
        if let Some(path) = overrides.raw_dump {
            self.output.raw_dump = Some(path);
        }
        if let Some(budget) = overrides.retry_budget {
            self.acquisition.retry_budget = budget;
        }
        if let Some(level) = overrides.log_level {
            self.application.log_level = level;
        }
        if let Some(format) = overrides.log_format {
            self.application.log_format = format;
        }
        self
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.instrument.port == 0 {
            return Err(invalid("Invalid port 0"));
        }
        if self.instrument.connect_timeout.is_zero() || self.instrument.io_timeout.is_zero() {
            return Err(invalid("connect_timeout and io_timeout must be non-zero"));
        }

        let acquisition = &self.acquisition;
        if acquisition.retry_budget == 0 {
            return Err(invalid("retry_budget must be at least 1"));
        }
        if acquisition.max_payload_bytes == 0 || acquisition.max_payload_bytes > MAX_PAYLOAD_BYTES
        {
            return Err(invalid(format!(
                "Invalid max_payload_bytes {}. Must be 1-{MAX_PAYLOAD_BYTES}",
                acquisition.max_payload_bytes
            )));
        }
        if acquisition.trigger_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("trigger_timeout must be non-zero when set"));
        }
        if acquisition.max_trigger_polls == Some(0) {
            return Err(invalid("max_trigger_polls must be at least 1 when set"));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| invalid(format!("Failed to serialize configuration: {e}")))
    }
}

fn invalid(message: impl Into<String>) -> DaqError {
    DaqError::Configuration(message.into())
}
