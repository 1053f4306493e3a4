//! Logger configuration

mod presets;

use serde::{Deserialize, Serialize};

/// Environment variable holding the filter directive, checked before `RUST_LOG`
pub const LOG_ENV: &str = "TETHER_LOG";

/// Environment variable selecting the output [`Format`]
pub const LOG_FORMAT_ENV: &str = "TETHER_LOG_FORMAT";

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info` or `tether_resource=debug`
    pub level: String,
    /// Output format
    pub format: Format,
    /// What each line shows
    pub display: DisplayConfig,
    /// Global fields attached to every event through a root span
    pub fields: Fields,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            display: DisplayConfig::default(),
            fields: Fields::default(),
        }
    }
}

impl Config {
    /// Override the filter directive
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Override the output format
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the `service` global field
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.fields.service = Some(service.into());
        self
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Single-line human readable output
    #[default]
    Compact,
    /// Multi-line human readable output
    Pretty,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name, falling back to [`Format::Compact`].
    #[must_use]
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Per-line display options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DisplayConfig {
    /// Timestamps
    pub time: bool,
    /// Event target (module path)
    pub target: bool,
    /// Source file and line
    pub source: bool,
    /// Thread ids
    pub thread_ids: bool,
    /// ANSI colours
    pub colors: bool,
    /// Flatten event fields into the top-level JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            target: true,
            source: false,
            thread_ids: false,
            colors: true,
            flatten: false,
        }
    }
}

impl DisplayConfig {
    /// Apply `NO_COLOR`, `TETHER_LOG_SOURCE` and `TETHER_LOG_THREADS`.
    pub fn parse_env(&mut self) {
        if std::env::var_os("NO_COLOR").is_some() {
            self.colors = false;
        }
        if let Some(source) = env_flag("TETHER_LOG_SOURCE") {
            self.source = source;
        }
        if let Some(threads) = env_flag("TETHER_LOG_THREADS") {
            self.thread_ids = threads;
        }
    }
}

/// Global fields recorded on the root span
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fields {
    /// Service name
    pub service: Option<String>,
    /// Deployment environment
    pub env: Option<String>,
}

impl Fields {
    /// Read `TETHER_SERVICE` and `TETHER_ENV`
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            service: std::env::var("TETHER_SERVICE").ok(),
            env: std::env::var("TETHER_ENV").ok(),
        }
    }

    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.env.is_none()
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("pretty", Format::Pretty)]
    #[case("JSON", Format::Json)]
    #[case(" compact ", Format::Compact)]
    #[case("logfmt", Format::Compact)]
    fn format_names(#[case] name: &str, #[case] expected: Format) {
        assert_eq!(Format::parse_lossy(name), expected);
    }

    #[test]
    fn deserialize_partial() {
        let config: Config =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, Format::Json);
        assert_eq!(config.display, DisplayConfig::default());
        assert!(config.fields.is_empty());
    }

    #[test]
    fn builder_methods() {
        let config = Config::default()
            .with_level("trace")
            .with_format(Format::Pretty)
            .with_service("watch");
        assert_eq!(config.level, "trace");
        assert_eq!(config.format, Format::Pretty);
        assert_eq!(config.fields.service.as_deref(), Some("watch"));
    }
}
