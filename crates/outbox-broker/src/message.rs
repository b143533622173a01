//! Producer contract and acknowledgement records.

use crate::BrokerError;
use outbox_database::Event;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Header carrying the event identity.
pub const HEADER_EVENT_ID: &str = "event_id";
/// Header carrying the event type.
pub const HEADER_EVENT_TYPE: &str = "event_type";

/// A message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Vec<u8>,
}

/// Outbound message handed to a producer.
///
/// `metadata` is never sent over the wire. Producers hand it back untouched on
/// the success or error stream so the acknowledgement can be correlated.
#[derive(Clone)]
pub struct ProducerMessage {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
    pub headers: Vec<RecordHeader>,
    pub metadata: Option<Arc<dyn Any + Send + Sync>>,
}

impl ProducerMessage {
    /// Build the outbound message for an event, keyed by aggregate ID.
    pub fn from_event(event: &Event) -> Self {
        Self {
            topic: event.topic.clone(),
            key: event.aggregate_id.clone(),
            value: event.payload.clone(),
            headers: vec![
                RecordHeader {
                    key: HEADER_EVENT_ID.to_string(),
                    value: event.id.clone().into_bytes(),
                },
                RecordHeader {
                    key: HEADER_EVENT_TYPE.to_string(),
                    value: event.event_type.clone().into_bytes(),
                },
            ],
            metadata: Some(Arc::new(MessageMetadata {
                id: event.id.clone(),
                event_type: event.event_type.clone(),
            })),
        }
    }

    /// Value of the first header with the given key.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Correlation metadata, if present and of the expected type.
    pub fn correlation(&self) -> Option<&MessageMetadata> {
        self.metadata
            .as_ref()
            .and_then(|m| m.downcast_ref::<MessageMetadata>())
    }
}

impl std::fmt::Debug for ProducerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerMessage")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .field("headers", &self.headers)
            .field("has_metadata", &self.metadata.is_some())
            .finish()
    }
}

/// A message the broker failed to deliver.
#[derive(Debug, Clone)]
pub struct ProducerError {
    pub message: ProducerMessage,
    pub reason: String,
}

/// Correlation tag attached to every published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub id: String,
    pub event_type: String,
}

/// Broker confirmed delivery of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessEvent {
    pub id: String,
    pub event_type: String,
}

/// Broker reported a delivery failure for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEvent {
    pub id: String,
    pub event_type: String,
    pub error: BrokerError,
}

/// Asynchronous message producer.
///
/// Messages go in through `input()`. Delivery outcomes come back on the
/// success and error streams. Each stream has a single consumer, so the
/// receivers can be taken once; later calls return `None`.
pub trait Producer: Send + Sync {
    /// Sender half of the producer input.
    fn input(&self) -> mpsc::Sender<ProducerMessage>;

    /// Take the stream of delivered messages.
    fn take_successes(&self) -> Option<mpsc::Receiver<ProducerMessage>>;

    /// Take the stream of failed deliveries.
    fn take_errors(&self) -> Option<mpsc::Receiver<ProducerError>>;
}
