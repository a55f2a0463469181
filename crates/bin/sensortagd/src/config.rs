//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `sensortag.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;

use sensortag_adapter_ble::BleConfig;
use sensortag_domain::id::PeripheralAddress;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Discovery and connection settings.
    pub ble: BleConfig,
    /// Which peripheral to stream from.
    pub session: SessionConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Session target.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address of the peripheral to connect to. When unset, the first
    /// peripheral found by the scan is used.
    pub device: Option<String>,
}

impl Config {
    /// Load configuration from `sensortag.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("sensortag.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("SENSORTAG_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("SENSORTAG_DEVICE") {
            self.session.device = Some(val);
        }
        if let Some(secs) = var("SENSORTAG_SCAN_SECS").and_then(|v| v.parse().ok()) {
            self.ble.scan_duration_secs = secs;
        }
        if let Some(secs) = var("SENSORTAG_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.ble.connect_timeout_secs = secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ble.scan_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "scan_duration_secs must be non-zero".to_string(),
            ));
        }
        if self.ble.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        self.device_address()?;
        Ok(())
    }

    /// Return the configured target address, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the address does not parse.
    pub fn device_address(&self) -> Result<Option<PeripheralAddress>, ConfigError> {
        self.session
            .device
            .as_deref()
            .map(|device| {
                device
                    .parse()
                    .map_err(|err| ConfigError::Validation(format!("session.device: {err}")))
            })
            .transpose()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sensortagd=info,sensortag=info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
