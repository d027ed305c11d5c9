//! Harness-wide configuration.

use std::time::Duration;

use thiserror::Error;
use tidepool_core::ArgumentError;

use crate::reactor::ClockMode;

/// Environment variable selecting the clock (`wall` or `logical`).
pub const CLOCK_ENV: &str = "TIDEPOOL_CLOCK";

/// Environment variable holding the default example timeout in milliseconds.
pub const DEFAULT_TIMEOUT_ENV: &str = "TIDEPOOL_DEFAULT_TIMEOUT_MS";

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The clock variable named an unknown mode.
    #[error("invalid TIDEPOOL_CLOCK: {0}")]
    Clock(#[source] ArgumentError),

    /// The timeout variable was not a whole number of milliseconds.
    #[error("invalid TIDEPOOL_DEFAULT_TIMEOUT_MS `{0}`: expected milliseconds")]
    Timeout(String),
}

/// Settings applied to every example run by a group.
///
/// # Example
///
/// ```ignore
/// let config = HarnessConfig::new()
///     .clock(ClockMode::Logical)
///     .default_timeout(Duration::from_secs(1));
/// let group = ExampleGroup::with_config("broker", config);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarnessConfig {
    /// Clock every reactor pass uses.
    pub clock: ClockMode,
    /// Deadline applied when neither the example nor its group sets one.
    pub default_timeout: Option<Duration>,
}

impl HarnessConfig {
    /// Wall clock, no default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock mode.
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Set the fallback deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Read `TIDEPOOL_CLOCK` and `TIDEPOOL_DEFAULT_TIMEOUT_MS`. Unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(clock) = lookup(CLOCK_ENV) {
            config.clock = clock.parse().map_err(ConfigError::Clock)?;
        }
        if let Some(raw) = lookup(DEFAULT_TIMEOUT_ENV) {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Timeout(raw.clone()))?;
            config.default_timeout = Some(Duration::from_millis(millis));
        }
        tracing::debug!(clock = %config.clock, default_timeout = ?config.default_timeout, "harness config loaded");
        Ok(config)
    }
}
