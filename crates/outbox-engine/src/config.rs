//! Engine configuration and validation.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 100;
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_RESERVE_DURATION: Duration = Duration::from_secs(2 * 60);
pub const MIN_PROCESS_TIMEOUT: Duration = Duration::from_millis(1100);

/// Outbox engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Concurrent publishes per cycle.
    pub workers: usize,
    /// Maximum events reserved per cycle.
    pub limit: usize,
    /// Poll cadence.
    pub interval: Duration,
    /// Lease length set on reserved events.
    pub reserve_duration: Duration,
    /// Deadline for each store operation and each publish.
    pub process_timeout: Duration,
    /// Recorded on the engine's tracing span.
    pub instance_name: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            limit: 50,
            interval: Duration::from_secs(5),
            reserve_duration: Duration::from_secs(5 * 60),
            process_timeout: Duration::from_secs(5),
            instance_name: "outbox".to_string(),
        }
    }
}

impl OutboxConfig {
    /// Check every bound and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            violations.push(ConfigViolation::new(
                "workers",
                format!("must be between {MIN_WORKERS} and {MAX_WORKERS}, got {}", self.workers),
            ));
        }
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&self.limit) {
            violations.push(ConfigViolation::new(
                "limit",
                format!("must be between {MIN_LIMIT} and {MAX_LIMIT}, got {}", self.limit),
            ));
        }
        if self.interval < MIN_INTERVAL {
            violations.push(ConfigViolation::new(
                "interval",
                format!("must be at least {MIN_INTERVAL:?}, got {:?}", self.interval),
            ));
        }
        if self.reserve_duration < MIN_RESERVE_DURATION {
            violations.push(ConfigViolation::new(
                "reserve_duration",
                format!(
                    "must be at least {MIN_RESERVE_DURATION:?}, got {:?}",
                    self.reserve_duration
                ),
            ));
        }
        if self.process_timeout < MIN_PROCESS_TIMEOUT {
            violations.push(ConfigViolation::new(
                "process_timeout",
                format!(
                    "must be at least {MIN_PROCESS_TIMEOUT:?}, got {:?}",
                    self.process_timeout
                ),
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }
}

/// One violated bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    pub field: &'static str,
    pub message: String,
}

impl ConfigViolation {
    fn new(field: &'static str, message: String) -> Self {
        Self { field, message }
    }
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Every bound the configuration violates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid outbox config: {}", join(.violations))]
pub struct ConfigError {
    pub violations: Vec<ConfigViolation>,
}

impl ConfigError {
    /// Names of the violated fields, in check order.
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }
}

fn join(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
