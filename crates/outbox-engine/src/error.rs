//! Engine error types.

use crate::{ConfigError, EngineState};
use outbox_broker::BrokerError;
use outbox_database::DatabaseError;
use std::time::Duration;
use thiserror::Error;

/// Outbox engine error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Unexpected store failure.
    #[error("Store error: {0}")]
    Internal(DatabaseError),

    /// No eligible events. Ends a poll cycle quietly.
    #[error("no new events")]
    NoNewEvents,

    /// A store update touched an unexpected number of rows.
    #[error("{operation}: expected to update {expected} rows, updated {actual}")]
    UpdateMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Publish failure.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Invalid engine configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation exceeded the process timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// An operation was abandoned because the engine is stopping.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// Background tasks did not finish before the stop deadline.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// The requested transition is not allowed from the current state.
    #[error("operation not allowed in state {0}")]
    InvalidState(EngineState),
}

impl From<DatabaseError> for OutboxError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::UpdateMismatch {
                operation,
                expected,
                actual,
            } => Self::UpdateMismatch {
                operation,
                expected,
                actual,
            },
            other => Self::Internal(other),
        }
    }
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
