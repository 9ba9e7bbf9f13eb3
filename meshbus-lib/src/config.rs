//! Configuration management with hierarchical overrides using figment.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (`MESHBUS_*`, `__` as the section separator)
//! 2. Configuration file (TOML, path supplied by the embedding application)
//! 3. Embedded defaults (lowest precedence)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] figment::Error),

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// Main configuration structure for meshbus components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Transit layer configuration
    pub transit: TransitConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Transit layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitConfig {
    /// Cap on in-flight outbound requests; 0 disables the limit
    pub max_queue_size: usize,
    /// Milliseconds between HEARTBEAT broadcasts; 0 disables the task
    pub heartbeat_interval_ms: u64,
    /// Transporter reconnection behavior
    pub reconnect: ReconnectConfig,
}

impl TransitConfig {
    /// Heartbeat cadence as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 0,
            heartbeat_interval_ms: 5000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnection delays for the transporter connect loop.
///
/// The defaults retry on a fixed 5 second cadence; setting `multiplier`
/// above 1.0 turns the cadence into exponential backoff capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on the retry delay, in milliseconds
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each failed attempt
    pub multiplier: f64,
}

impl ReconnectConfig {
    /// Initial retry delay as a [`Duration`].
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum retry delay as a [`Duration`].
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// The delay to use after one more failed attempt.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.multiplier);
        scaled.min(self.max_delay())
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5000,
            max_delay_ms: 60_000,
            multiplier: 1.0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, human)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "human".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file, and
    /// `MESHBUS_*` environment variables, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("MESHBUS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints not expressible in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reconnect = &self.transit.reconnect;
        if reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "transit.reconnect.initial_delay_ms must be greater than zero".to_owned(),
            });
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ConfigError::ValidationError {
                message: "transit.reconnect.max_delay_ms must not be below initial_delay_ms"
                    .to_owned(),
            });
        }
        if reconnect.multiplier < 1.0 {
            return Err(ConfigError::ValidationError {
                message: "transit.reconnect.multiplier must be at least 1.0".to_owned(),
            });
        }
        Ok(())
    }
}
