//! Resource configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Queue capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Environment variable read by [`ResourceConfig::from_env`]
pub const QUEUE_CAPACITY_ENV: &str = "TETHER_QUEUE_CAPACITY";

/// Tunables for a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResourceConfig {
    /// Maximum number of requests waiting in the queue at once
    pub queue_capacity: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ResourceConfig {
    /// Set the queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::configuration("queue_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Defaults overridden by `TETHER_QUEUE_CAPACITY` when it is set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(QUEUE_CAPACITY_ENV) {
            config.queue_capacity = raw.trim().parse().map_err(|e| {
                Error::configuration(format!("{QUEUE_CAPACITY_ENV}={raw:?}: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity() {
        let config = ResourceConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = ResourceConfig::default()
            .with_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_use_defaults() {
        let config: ResourceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ResourceConfig::default());

        let config: ResourceConfig = serde_json::from_str(r#"{"queue_capacity": 8}"#).unwrap();
        assert_eq!(config.queue_capacity, 8);
    }
}
