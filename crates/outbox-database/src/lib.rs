//! SQLite event store for the outbox relay.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread and a transaction wrapper
//! - Database migrations for the `events` table
//! - Model types for outbox events
//! - Store queries with row-count-exact mutation semantics
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let id = db
//!     .transaction(move |tx| {
//!         insert_order(tx, &order)?;
//!         queries::insert_event(tx, &event, Utc::now())
//!     })
//!     .await?;
//! ```
//!
//! Writing the event in the same transaction as the business change is what
//! makes "event recorded" atomic with "state changed".

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
