//! Transactional outbox dispatch engine.
//!
//! This crate provides:
//! - `Outbox`: polls the events table, publishes reserved batches and
//!   confirms or releases events as broker acknowledgements arrive
//! - `EventUsecase`: the lease protocol, each step one SQLite transaction
//! - `OutboxConfig`: validated engine settings
//! - `run_bounded`: bounded-concurrency fan-out used for publishing
//!
//! Delivery is at-least-once. An event whose lease expires before it is
//! confirmed is published again, so consumers must deduplicate by event ID.

mod config;
mod engine;
mod error;
mod usecase;
mod worker_pool;

pub use config::{ConfigError, ConfigViolation, OutboxConfig};
pub use engine::{CycleOutcome, EngineState, Outbox};
pub use error::{OutboxError, OutboxResult};
pub use usecase::EventUsecase;
pub use worker_pool::run_bounded;

pub use outbox_database::{AsyncDatabase, CreateEvent, Event, EventStatus};
