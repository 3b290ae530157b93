//! Structured logging setup.
//!
//! The client logs through `tracing`; this module installs a subscriber for
//! binaries and tests that do not bring their own. The filter is read from
//! the `GRAPHPS_LOG` environment variable.
//!
//! # Environment Variables
//!
//! - `GRAPHPS_LOG=info` - Default log level
//! - `GRAPHPS_LOG=graphps_client::coordinator=debug` - Per-fan-out dispatch logs
//! - `GRAPHPS_LOG=warn,graphps_client::protocol=trace` - Combined filters

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "GRAPHPS_LOG";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initializes the global subscriber at `info` unless `GRAPHPS_LOG` says otherwise.
///
/// Later calls are ignored; only one global subscriber can be set.
pub fn init() {
    init_with_default("info");
}

/// Initializes the global subscriber with a custom default level.
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = subscriber.try_init();
}

/// Initializes logging with JSON output, for log aggregators.
pub fn init_json() {
    init_json_with_default("info");
}

fn init_json_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .json();

    let _ = subscriber.try_init();
}

/// Initializes logging from the `[logging]` section of the configuration.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json_with_default(&config.level);
    } else {
        init_with_default(&config.level);
    }
}
