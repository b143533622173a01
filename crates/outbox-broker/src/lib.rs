//! Broker side of the outbox relay.
//!
//! This crate provides:
//! - `Producer`: the contract a message broker client must satisfy
//! - `BrokerAdapter`: publishes events with correlation metadata and turns
//!   the producer's raw acknowledgements into `SuccessEvent`/`FailedEvent`
//! - `MemoryProducer`: an in-process producer used by tests and the CLI

mod adapter;
mod error;
mod memory;
mod message;

pub use adapter::{AckStream, BrokerAdapter};
pub use error::{BrokerError, BrokerResult};
pub use memory::{MemoryBroker, MemoryProducer};
pub use message::{
    FailedEvent, MessageMetadata, Producer, ProducerError, ProducerMessage, RecordHeader,
    SuccessEvent, HEADER_EVENT_ID, HEADER_EVENT_TYPE,
};
