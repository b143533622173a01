//! # Observability
//!
//! Tracing subscriber setup shared by every outbox-relay binary.
//!
//! Components only use `tracing` macros and spans. Where the output goes is
//! decided once, at startup, by calling `init` or `init_with_config`.
//!
//! ## Dev Mode
//!
//! With the `dev` feature (on by default) every event is written as one JSON
//! object per line to `~/.outbox-relay/logs/outbox.jsonl`, or to
//! `LogConfig::log_path` when set:
//!
//! ```text
//! tail -f ~/.outbox-relay/logs/outbox.jsonl | jq
//! ```
//!
//! Each line carries the enclosing span's name and fields, so events logged
//! inside an engine's `outbox{instance=...}` span can be filtered per
//! instance.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "outbox-relay".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

use std::io;
use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written on every log line.
    pub service_name: String,

    /// Default level filter. `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Log file path. Defaults to `~/.outbox-relay/logs/outbox.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    install(&config)
}

#[cfg(feature = "dev")]
fn install(config: &LogConfig) -> io::Result<()> {
    dev::init_dev_subscriber(config)
}

#[cfg(not(feature = "dev"))]
fn install(config: &LogConfig) -> io::Result<()> {
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.default_level))
        .with_target(true)
        .compact()
        .with_writer(io::stderr)
        .finish()
        .try_init()
        .map_err(io::Error::other)
}

/// `RUST_LOG` if set and valid, otherwise `default_level`.
fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
