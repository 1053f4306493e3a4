//! Layered configuration: defaults → `tether.toml` → `TETHER_WATCH_*` env →
//! command-line flags.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tether_resource::ResourceConfig;

/// Prefix of environment overrides; nested keys use `__`
/// (`TETHER_WATCH_LOG__LEVEL=debug`).
pub const ENV_PREFIX: &str = "TETHER_WATCH_";

/// Configuration of the watcher binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Changes to observe before the watch completes
    pub changes: usize,
    /// Seconds to wait for each change before giving up
    pub timeout_secs: u64,
    /// Logger settings
    pub log: tether_log::Config,
    /// Resource tunables
    pub resource: ResourceConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            changes: 2,
            timeout_secs: 30,
            log: tether_log::Config::default(),
            resource: ResourceConfig::default(),
        }
    }
}

/// Values given on the command line; unset fields leave lower layers alone.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// `--changes`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<usize>,
    /// `--timeout-secs`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// `--log-level` / `--log-format`
    #[serde(skip_serializing_if = "LogOverrides::is_empty")]
    pub log: LogOverrides,
}

/// Logger values given on the command line
#[derive(Debug, Default, Serialize)]
pub struct LogOverrides {
    /// Filter directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Output format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<tether_log::Format>,
}

impl LogOverrides {
    fn is_empty(&self) -> bool {
        self.level.is_none() && self.format.is_none()
    }
}

/// Merge every layer and extract the result.
pub fn load(file: &Path, overrides: Overrides) -> Result<WatchConfig, figment::Error> {
    Figment::from(Serialized::defaults(WatchConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
        .extract()
}
