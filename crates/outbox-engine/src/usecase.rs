//! Reservation and confirmation protocol.
//!
//! Each operation is one SQLite transaction, so a failed step never leaves
//! a partial lease or a half-confirmed event behind.

use crate::{OutboxError, OutboxResult};
use chrono::Utc;
use outbox_broker::{FailedEvent, SuccessEvent};
use outbox_database::{queries, AsyncDatabase, CreateEvent, DatabaseError, Event};
use std::time::Duration;
use tracing::debug;

/// Store-side operations used by the engine.
#[derive(Clone)]
pub struct EventUsecase {
    db: AsyncDatabase,
}

impl EventUsecase {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Insert a new event and return its generated ID.
    pub async fn add_new_event(&self, event: CreateEvent) -> OutboxResult<String> {
        let id = self
            .db
            .call(move |conn| queries::insert_event(conn, &event, Utc::now()))
            .await?;
        Ok(id)
    }

    /// Claim up to `limit` eligible events with a lease of `lease`.
    ///
    /// Returns `NoNewEvents` when nothing is eligible. The returned events
    /// carry the lease that was written.
    pub async fn reserve_new_events(&self, limit: usize, lease: Duration) -> OutboxResult<Vec<Event>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| DatabaseError::InvalidData(format!("lease duration: {e}")))?;

        let events = self
            .db
            .transaction(move |tx| {
                let now = Utc::now();
                let mut events = queries::find_new_and_not_reserved(tx, limit, now)?;
                if events.is_empty() {
                    return Ok(events);
                }

                let reserved_to = now + lease;
                let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
                queries::set_reserved_to_by_ids(tx, &ids, reserved_to)?;

                for event in &mut events {
                    event.reserved_to = Some(reserved_to);
                }
                Ok(events)
            })
            .await?;

        if events.is_empty() {
            return Err(OutboxError::NoNewEvents);
        }

        debug!(count = events.len(), "Events reserved");
        Ok(events)
    }

    /// Clear the lease and mark the event done.
    pub async fn confirm_event(&self, event: &SuccessEvent) -> OutboxResult<()> {
        let id = event.id.clone();
        self.db
            .transaction(move |tx| {
                queries::remove_reserve(tx, &id)?;
                queries::mark_event_done(tx, &id)
            })
            .await?;
        Ok(())
    }

    /// Clear the lease only, so the next cycle picks the event up again.
    pub async fn confirm_failed(&self, event: &FailedEvent) -> OutboxResult<()> {
        let id = event.id.clone();
        self.db
            .transaction(move |tx| queries::remove_reserve(tx, &id))
            .await?;
        Ok(())
    }
}
