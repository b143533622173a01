//! Broker error types.

use std::time::Duration;
use thiserror::Error;

/// Per-event broker failure.
///
/// Cloneable so a failure can travel on the acknowledgement stream and still
/// be logged by whoever consumes it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The producer input did not accept the message in time.
    #[error("publish timed out after {timeout:?}: event_id {event_id}")]
    Timeout { event_id: String, timeout: Duration },

    /// Shutdown was requested while the publish was pending.
    #[error("publish cancelled: event_id {event_id}")]
    Cancelled { event_id: String },

    /// The producer input channel is closed.
    #[error("producer input closed: event_id {event_id}")]
    InputClosed { event_id: String },

    /// The broker reported a delivery failure.
    #[error("broker rejected event {event_id}: {reason}")]
    Rejected { event_id: String, reason: String },
}

impl BrokerError {
    /// ID of the event this failure belongs to.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Timeout { event_id, .. }
            | Self::Cancelled { event_id }
            | Self::InputClosed { event_id }
            | Self::Rejected { event_id, .. } => event_id,
        }
    }
}

/// Result type alias using BrokerError.
pub type BrokerResult<T> = Result<T, BrokerError>;
