//! Logging bootstrap built on tracing-subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global tracing subscriber from the logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use [`try_init`]
/// from tests.
pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    tracing::debug!("Logging initialized (level: {})", config.level);
}

/// Install the global tracing subscriber, ignoring an already-installed one.
pub fn try_init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    drop(result);
}
