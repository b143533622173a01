//! Logging bootstrap.
//!
//! Installs the observability subscriber: JSONL to the relay's log file,
//! compact output on stderr, `RUST_LOG` taking precedence over `level`.

use std::path::Path;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];

/// Service name written on every log line.
const SERVICE_NAME: &str = "outbox-relay";

/// Initialize logging for the relay.
///
/// ```ignore
/// init_logging("info", &paths.log_file())?;
/// tracing::info!("Relay started");
/// ```
pub fn init_logging(level: &str, log_path: &Path) -> std::io::Result<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: normalize_level(level).into(),
        log_path: Some(log_path.to_path_buf()),
        also_stderr: true,
    })
}

/// Whether `level` names a tracing level.
pub fn is_known_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level.to_lowercase().as_str())
}

/// Parse a log level string into a tracing Level. Unknown values map to INFO.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Filter directive for `level`.
fn normalize_level(level: &str) -> &'static str {
    match parse_level(level) {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}
