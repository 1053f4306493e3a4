//! # Tether Log
//!
//! One-call `tracing` subscriber setup shared by tether binaries and tests.
//!
//! ```no_run
//! use tether_log::Config;
//!
//! let _guard = tether_log::init(Config::from_env())?;
//! tracing::info!("ready");
//! # Ok::<(), tether_log::LogError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Fields, Format};
pub use error::{LogError, LogResult};

// Re-export the macros so callers need only one logging dependency
pub use tracing::{debug, error, info, trace, warn};

/// Initialise the global subscriber from `config`.
///
/// Keep the returned guard alive for as long as logging is needed.
pub fn init(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialise with [`Config::from_env`], falling back to the defaults.
pub fn auto_init() -> LogResult<LoggerGuard> {
    init(Config::from_env())
}
