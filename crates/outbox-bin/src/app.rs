//! Relay commands.

use chrono::Utc;
use outbox_broker::MemoryProducer;
use outbox_config_and_utils::{Config, OutboxSettings, Paths};
use outbox_database::{queries, AsyncDatabase, CreateEvent, EventCounts};
use outbox_engine::{Outbox, OutboxConfig};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown may take before giving up on background tasks.
const STOP_DEADLINE: Duration = Duration::from_secs(10);

/// Messages the in-process broker buffers before publishes back up.
const BROKER_CAPACITY: usize = 256;

type AppResult<T> = Result<T, Box<dyn Error>>;

/// Engine configuration from on-disk settings.
pub fn outbox_config(settings: &OutboxSettings, instance_name: String) -> OutboxConfig {
    OutboxConfig {
        workers: settings.workers,
        limit: settings.limit,
        interval: Duration::from_millis(settings.interval_ms),
        reserve_duration: Duration::from_millis(settings.reserve_duration_ms),
        process_timeout: Duration::from_millis(settings.process_timeout_ms),
        instance_name,
    }
}

/// Run the relay against the in-process broker until Ctrl-C.
///
/// The broker logs every message and acknowledges it.
pub async fn run_relay(config: &Config, paths: &Paths) -> AppResult<()> {
    let db = AsyncDatabase::open(&config.database_path(paths)).await?;

    let (producer, broker) = MemoryProducer::new(BROKER_CAPACITY);
    let broker_cancel = CancellationToken::new();
    let broker_task = broker.spawn_auto_ack(broker_cancel.clone());

    let instance_name = format!("outbox-relay-{}", std::process::id());
    let outbox = Outbox::new(
        db.clone(),
        Arc::new(producer),
        outbox_config(&config.outbox, instance_name),
    )?;
    outbox.start()?;
    info!(database = %db.path(), "Relay running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let stopped = outbox.stop(STOP_DEADLINE).await;
    if let Err(e) = &stopped {
        warn!(error = %e, "Relay did not stop cleanly");
    }

    broker_cancel.cancel();
    if let Err(e) = broker_task.await {
        warn!(error = %e, "Broker task failed");
    }

    db.close().await?;
    stopped?;
    Ok(())
}

/// Record a new event and return its ID.
pub async fn enqueue(config: &Config, paths: &Paths, event: CreateEvent) -> AppResult<String> {
    let db = AsyncDatabase::open(&config.database_path(paths)).await?;
    let id = db
        .call(move |conn| queries::insert_event(conn, &event, Utc::now()))
        .await?;
    info!(event_id = %id, "Event enqueued");
    db.close().await?;
    Ok(id)
}

/// Count events by state.
pub async fn status(config: &Config, paths: &Paths) -> AppResult<EventCounts> {
    let db = AsyncDatabase::open(&config.database_path(paths)).await?;
    let counts = db
        .call(|conn| queries::count_events(conn, Utc::now()))
        .await?;
    db.close().await?;
    Ok(counts)
}
