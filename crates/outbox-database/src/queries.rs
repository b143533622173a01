//! Standalone query functions that work with any Connection.
//!
//! Every function takes a `&Connection` first, so the same code runs inside
//! `AsyncDatabase::call` or inside a caller's own transaction (a
//! `rusqlite::Transaction` derefs to `Connection`).
//!
//! Timestamps are stored as epoch milliseconds. Mutations that must touch an
//! exact number of rows return `DatabaseError::UpdateMismatch` otherwise.

use crate::{CreateEvent, DatabaseError, DatabaseResult, Event, EventCounts, EventStatus};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ToSql};
use tracing::debug;

const EVENT_COLUMNS: &str =
    "id, aggregate_id, event_topic, event_type, payload, status, created_at, reserved_to";

// ==========================================
// Events
// ==========================================

/// Insert a new event in `new` status with no lease.
///
/// The identity is generated here. Call this inside the same transaction as
/// the business write the event records.
pub fn insert_event(
    conn: &Connection,
    event: &CreateEvent,
    now: DateTime<Utc>,
) -> DatabaseResult<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO events (id, aggregate_id, event_topic, event_type, payload, status, created_at, reserved_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
        params![
            id,
            event.aggregate_id,
            event.topic,
            event.event_type,
            event.payload,
            EventStatus::New.as_str(),
            to_millis(now),
        ],
    )?;
    debug!(event_id = %id, topic = %event.topic, "Event inserted");
    Ok(id)
}

/// Get an event by ID.
pub fn get_event(conn: &Connection, id: &str) -> DatabaseResult<Option<Event>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], read_event_row);

    match result {
        Ok(row) => Ok(Some(row.into_event()?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Find up to `limit` events eligible for dispatch at `now`, oldest first.
pub fn find_new_and_not_reserved(
    conn: &Connection,
    limit: usize,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<Event>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE status != 'done' AND (reserved_to IS NULL OR reserved_to < ?1)
         ORDER BY created_at, id
         LIMIT ?2"
    ))?;

    let limit = i64::try_from(limit)
        .map_err(|_| DatabaseError::InvalidData(format!("limit out of range: {limit}")))?;

    let rows = stmt
        .query_map(params![to_millis(now), limit], read_event_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EventRow::into_event).collect()
}

/// Set the lease expiry on every listed event.
///
/// Must update exactly `ids.len()` rows. An empty list is a no-op.
pub fn set_reserved_to_by_ids(
    conn: &Connection,
    ids: &[String],
    reserved_to: DateTime<Utc>,
) -> DatabaseResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let placeholders = (0..ids.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE events SET reserved_to = ?1 WHERE status != 'done' AND id IN ({placeholders})"
    );

    let reserved_to = to_millis(reserved_to);
    let mut values: Vec<&dyn ToSql> = Vec::with_capacity(ids.len() + 1);
    values.push(&reserved_to);
    values.extend(ids.iter().map(|id| id as &dyn ToSql));

    let updated = conn.execute(&sql, values.as_slice())?;
    expect_rows("set_reserved_to_by_ids", ids.len(), updated)
}

/// Clear the lease on one event. Status is left untouched.
pub fn remove_reserve(conn: &Connection, id: &str) -> DatabaseResult<()> {
    let updated = conn.execute(
        "UPDATE events SET reserved_to = NULL WHERE id = ?1 AND status != 'done'",
        params![id],
    )?;
    expect_rows("remove_reserve", 1, updated)
}

/// Mark one event as delivered. Done rows are never updated again.
pub fn mark_event_done(conn: &Connection, id: &str) -> DatabaseResult<()> {
    let updated = conn.execute(
        "UPDATE events SET status = ?1 WHERE id = ?2 AND status != 'done'",
        params![EventStatus::Done.as_str(), id],
    )?;
    expect_rows("mark_event_done", 1, updated)
}

/// Count events by dispatch state at `now`.
pub fn count_events(conn: &Connection, now: DateTime<Utc>) -> DatabaseResult<EventCounts> {
    let (new, reserved, done): (i64, i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status != 'done' AND (reserved_to IS NULL OR reserved_to < ?1) THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status != 'done' AND reserved_to >= ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0)
         FROM events",
        params![to_millis(now)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(EventCounts {
        new: new as u64,
        reserved: reserved as u64,
        done: done as u64,
    })
}

// ==========================================
// Helpers
// ==========================================

fn expect_rows(operation: &'static str, expected: usize, actual: usize) -> DatabaseResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DatabaseError::UpdateMismatch {
            operation,
            expected,
            actual,
        })
    }
}

/// Raw column values of one `events` row.
struct EventRow {
    id: String,
    aggregate_id: String,
    topic: String,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    created_at: i64,
    reserved_to: Option<i64>,
}

impl EventRow {
    fn into_event(self) -> DatabaseResult<Event> {
        Ok(Event {
            created_at: from_millis(self.created_at)?,
            reserved_to: self.reserved_to.map(from_millis).transpose()?,
            status: EventStatus::from_str(&self.status),
            id: self.id,
            aggregate_id: self.aggregate_id,
            topic: self.topic,
            event_type: self.event_type,
            payload: self.payload,
        })
    }
}

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        aggregate_id: row.get(1)?,
        topic: row.get(2)?,
        event_type: row.get(3)?,
        payload: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        reserved_to: row.get(7)?,
    })
}

/// Convert a timestamp to the stored epoch-millisecond form.
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Convert a stored epoch-millisecond value back to a timestamp.
pub fn from_millis(ms: i64) -> DatabaseResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DatabaseError::InvalidData(format!("timestamp out of range: {ms}")))
}
