//! Item store configuration.
//!
//! # Invariants
//! - `progress_interval` is at least 1.
//! - Durations are expressed in milliseconds in JSON input.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Wait after bulk load before the store reports readiness.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Number of reconstructed items between progress notifications.
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 10;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "cannot parse store config: {err}"),
            Self::Invalid(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Tunables for bulk-load progress reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Absorbs straggling backend client writes that complete after the
    /// collection fetch resolves.
    pub settle_delay: Duration,
    pub progress_interval: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawStoreConfig {
    settle_delay_ms: Option<u64>,
    progress_interval: Option<u32>,
}

impl StoreConfig {
    /// Parses a JSON object; absent keys keep their defaults.
    ///
    /// Example: `{"settleDelayMs": 500, "progressInterval": 25}`.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawStoreConfig = serde_json::from_str(input).map_err(ConfigError::Parse)?;
        let defaults = Self::default();
        let config = Self {
            settle_delay: raw
                .settle_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            progress_interval: raw.progress_interval.unwrap_or(defaults.progress_interval),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_interval == 0 {
            return Err(ConfigError::Invalid(
                "progressInterval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
