//! Outbox engine: polling, fan-out publishing and acknowledgement handling.
//!
//! ```text
//! ┌──────────────┐  reserve   ┌────────┐
//! │ dispatch loop│───────────▶│ SQLite │◀──────────────┐
//! └──────┬───────┘            └────────┘               │ confirm / release
//!        │ run_bounded(workers)                        │
//!        ▼                                             │
//! ┌──────────────┐  input  ┌──────────┐  acks  ┌───────┴──────┐
//! │ BrokerAdapter│────────▶│ Producer │───────▶│ success/error│
//! └──────────────┘         └──────────┘        │    loops     │
//!                                              └──────────────┘
//! ```
//!
//! All background tasks share one `CancellationToken` and are tracked by one
//! `TaskTracker`, so `stop` can wait for every loop and in-flight cycle.

use crate::{run_bounded, EventUsecase, OutboxConfig, OutboxError, OutboxResult};
use outbox_broker::{AckStream, BrokerAdapter, FailedEvent, Producer, SuccessEvent};
use outbox_database::{AsyncDatabase, CreateEvent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was still running.
    Skipped,
    /// Nothing was eligible.
    NoNewEvents,
    /// A batch was reserved and handed to the broker.
    ///
    /// `failed` counts events whose publish did not complete. Their leases
    /// stay in place until they expire.
    Dispatched { reserved: usize, failed: usize },
}

/// Transactional outbox relay.
pub struct Outbox {
    inner: Arc<Inner>,
    state: Mutex<EngineState>,
}

struct Inner {
    usecase: EventUsecase,
    broker: BrokerAdapter,
    config: OutboxConfig,
    in_process: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    span: Span,
}

impl Outbox {
    /// Create an engine. Fails if the configuration violates any bound.
    pub fn new(
        db: AsyncDatabase,
        producer: Arc<dyn Producer>,
        config: OutboxConfig,
    ) -> OutboxResult<Self> {
        config.validate()?;

        let span = info_span!("outbox", instance = %config.instance_name);

        Ok(Self {
            inner: Arc::new(Inner {
                usecase: EventUsecase::new(db),
                broker: BrokerAdapter::new(producer),
                config,
                in_process: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                span,
            }),
            state: Mutex::new(EngineState::Created),
        })
    }

    /// Start the dispatch loop and both acknowledgement loops.
    ///
    /// Returns immediately. Must be called from within a Tokio runtime and
    /// only once.
    pub fn start(&self) -> OutboxResult<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Created {
            return Err(OutboxError::InvalidState(*state));
        }

        let inner = &self.inner;
        let successes = inner.broker.successes(&inner.cancel);
        let errors = inner.broker.errors(&inner.cancel);

        inner.tracker.spawn(
            Arc::clone(inner)
                .success_loop(successes)
                .instrument(inner.span.clone()),
        );
        inner.tracker.spawn(
            Arc::clone(inner)
                .error_loop(errors)
                .instrument(inner.span.clone()),
        );
        inner
            .tracker
            .spawn(Arc::clone(inner).dispatch_loop().instrument(inner.span.clone()));

        *state = EngineState::Running;
        info!(
            parent: &inner.span,
            workers = inner.config.workers,
            limit = inner.config.limit,
            interval = ?inner.config.interval,
            "Outbox started"
        );
        Ok(())
    }

    /// Cancel every background task and wait up to `deadline` for them.
    ///
    /// On timeout the engine stays in `Stopping` and `stop` may be called
    /// again. Stopping an engine that never started is immediate.
    pub async fn stop(&self, deadline: Duration) -> OutboxResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Created => {
                    self.inner.cancel.cancel();
                    *state = EngineState::Stopped;
                    return Ok(());
                }
                EngineState::Stopped => return Ok(()),
                EngineState::Running | EngineState::Stopping => *state = EngineState::Stopping,
            }
        }

        self.inner.cancel.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(deadline, self.inner.tracker.wait()).await {
            Ok(()) => {
                *self.state.lock() = EngineState::Stopped;
                info!(parent: &self.inner.span, "Outbox stopped successfully");
                Ok(())
            }
            Err(_) => {
                warn!(
                    parent: &self.inner.span,
                    deadline = ?deadline,
                    remaining_tasks = self.inner.tracker.len(),
                    "Outbox stop deadline exceeded"
                );
                Err(OutboxError::ShutdownTimeout(deadline))
            }
        }
    }

    /// Insert a new event outside any caller transaction.
    ///
    /// To record the event atomically with a business change, use
    /// `AsyncDatabase::transaction` with `queries::insert_event` instead.
    pub async fn add_new_event(&self, event: CreateEvent) -> OutboxResult<String> {
        self.inner.usecase.add_new_event(event).await
    }

    /// Run one poll cycle now, under the same single-flight guard as the
    /// dispatch loop.
    pub async fn dispatch_once(&self) -> OutboxResult<CycleOutcome> {
        let Some(_guard) = CycleGuard::try_acquire(&self.inner) else {
            return Ok(CycleOutcome::Skipped);
        };
        self.inner
            .run_cycle()
            .instrument(self.inner.span.clone())
            .await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    async fn dispatch_loop(self: Arc<Self>) {
        let interval = self.config.interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Event processing stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let Some(guard) = CycleGuard::try_acquire(&self) else {
                        debug!("Previous cycle still running, tick dropped");
                        continue;
                    };

                    let inner = Arc::clone(&self);
                    self.tracker.spawn(
                        async move {
                            let _guard = guard;
                            let outcome = inner.run_cycle().await;
                            log_cycle(&outcome);
                        }
                        .instrument(Span::current()),
                    );
                }
            }
        }
    }

    async fn run_cycle(&self) -> OutboxResult<CycleOutcome> {
        let reserve = self
            .usecase
            .reserve_new_events(self.config.limit, self.config.reserve_duration);

        let events = match self.with_deadline("reserve_new_events", reserve).await {
            Ok(events) => events,
            Err(OutboxError::NoNewEvents) => return Ok(CycleOutcome::NoNewEvents),
            Err(e) => return Err(e),
        };
        let reserved = events.len();
        let mut unreported: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();

        let results = run_bounded(&self.cancel, events, self.config.workers, |event| async move {
            let result = self
                .broker
                .publish(&event, &self.cancel, self.config.process_timeout)
                .await;
            (event.id, result)
        })
        .await;

        let mut published = 0;
        for (event_id, result) in results {
            match result {
                Ok(()) => published += 1,
                Err(e) => warn!(event_id = %event_id, error = %e, "Publish failed"),
            }
            unreported.remove(&event_id);
        }

        // Publishes still in flight when the engine stopped were dropped.
        for event_id in &unreported {
            warn!(event_id = %event_id, "Publish abandoned, engine stopping");
        }

        Ok(CycleOutcome::Dispatched {
            reserved,
            failed: reserved - published,
        })
    }

    async fn success_loop(self: Arc<Self>, stream: AckStream<SuccessEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Success monitoring stopped: cancelled");
                    return;
                }
                event = stream.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Success monitoring stopped: stream closed");
                        return;
                    }
                },
            };

            let confirm = self.usecase.confirm_event(&event);
            match self.with_deadline("confirm_event", confirm).await {
                Ok(()) => info!(event_id = %event.id, event_type = %event.event_type, "Event sent"),
                Err(e) => error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to confirm event after successful send"
                ),
            }
        }
    }

    async fn error_loop(self: Arc<Self>, stream: AckStream<FailedEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Error monitoring stopped: cancelled");
                    return;
                }
                event = stream.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Error monitoring stopped: stream closed");
                        return;
                    }
                },
            };

            warn!(event_id = %event.id, error = %event.error, "Event send failed");

            let release = self.usecase.confirm_failed(&event);
            if let Err(e) = self.with_deadline("confirm_failed", release).await {
                error!(event_id = %event.id, error = %e, "Failed to release failed event");
            }
        }
    }

    /// Bound a store operation by the process timeout and the shutdown signal.
    ///
    /// An abandoned operation may still finish on the database thread; its
    /// transaction either commits whole or not at all.
    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = OutboxResult<T>>,
    ) -> OutboxResult<T> {
        let timeout = self.config.process_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OutboxError::Cancelled { operation }),
            result = tokio::time::timeout(timeout, fut) => {
                result.unwrap_or_else(|_| Err(OutboxError::Timeout { operation, timeout }))
            }
        }
    }
}

fn log_cycle(outcome: &OutboxResult<CycleOutcome>) {
    match outcome {
        Ok(CycleOutcome::Skipped) => {}
        Ok(CycleOutcome::NoNewEvents) => debug!("Skip processing, no new events"),
        Ok(CycleOutcome::Dispatched { reserved, failed }) => {
            info!(reserved, failed, "Dispatch cycle finished")
        }
        Err(e) => error!(error = %e, "Dispatch cycle failed"),
    }
}

/// Single-flight flag for poll cycles. Released on drop.
struct CycleGuard {
    inner: Arc<Inner>,
}

impl CycleGuard {
    fn try_acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .in_process
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
            })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.in_process.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outbox_broker::{MemoryBroker, MemoryProducer};
    use outbox_database::{queries, EventCounts};

    async fn engine() -> (Outbox, MemoryBroker) {
        let (outbox, broker, _db) = engine_with_capacity(16).await;
        (outbox, broker)
    }

    async fn engine_with_capacity(capacity: usize) -> (Outbox, MemoryBroker, AsyncDatabase) {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let (producer, broker) = MemoryProducer::new(capacity);
        let outbox = Outbox::new(db.clone(), Arc::new(producer), OutboxConfig::default()).unwrap();
        (outbox, broker, db)
    }

    async fn counts(db: &AsyncDatabase) -> EventCounts {
        db.call(|conn| queries::count_events(conn, Utc::now()))
            .await
            .unwrap()
    }

    /// Poll `cond` every 10ms until it holds or `within` passes.
    async fn eventually<F, Fut>(within: Duration, mut cond: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if cond().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond().await
    }

    fn create() -> CreateEvent {
        CreateEvent {
            aggregate_id: "order-1".to_string(),
            topic: "orders".to_string(),
            event_type: "OrderCreated".to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let (producer, _broker) = MemoryProducer::new(1);
        let config = OutboxConfig {
            workers: 0,
            limit: 0,
            ..Default::default()
        };

        match Outbox::new(db, Arc::new(producer), config) {
            Err(OutboxError::Config(err)) => assert_eq!(err.fields(), vec!["workers", "limit"]),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("invalid config accepted"),
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (outbox, _broker) = engine().await;
        assert_eq!(outbox.state(), EngineState::Created);

        outbox.start().unwrap();
        assert_eq!(outbox.state(), EngineState::Running);
        assert!(matches!(
            outbox.start(),
            Err(OutboxError::InvalidState(EngineState::Running))
        ));

        outbox.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outbox.state(), EngineState::Stopped);

        outbox.stop(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            outbox.start(),
            Err(OutboxError::InvalidState(EngineState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (outbox, _broker) = engine().await;
        outbox.stop(Duration::ZERO).await.unwrap();
        assert_eq!(outbox.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_deadline_exceeded() {
        let (outbox, _broker) = engine().await;
        outbox.start().unwrap();

        // A tracked task that ignores cancellation holds shutdown open.
        outbox
            .inner
            .tracker
            .spawn(tokio::time::sleep(Duration::from_millis(300)));

        let err = outbox.stop(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, OutboxError::ShutdownTimeout(d) if d == Duration::from_millis(20)));
        assert_eq!(outbox.state(), EngineState::Stopping);

        outbox.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outbox.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_dispatch_once_skipped_while_cycle_runs() {
        let (outbox, _broker) = engine().await;
        outbox.add_new_event(create()).await.unwrap();

        let guard = CycleGuard::try_acquire(&outbox.inner).unwrap();
        assert!(CycleGuard::try_acquire(&outbox.inner).is_none());
        assert_eq!(outbox.dispatch_once().await.unwrap(), CycleOutcome::Skipped);

        drop(guard);
        assert_eq!(
            outbox.dispatch_once().await.unwrap(),
            CycleOutcome::Dispatched {
                reserved: 1,
                failed: 0
            }
        );
        assert!(!outbox.inner.in_process.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_once_no_new_events() {
        let (outbox, _broker) = engine().await;
        assert_eq!(outbox.dispatch_once().await.unwrap(), CycleOutcome::NoNewEvents);
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_cancelled() {
        let (outbox, _broker) = engine().await;
        outbox.add_new_event(create()).await.unwrap();
        outbox.stop(Duration::from_secs(1)).await.unwrap();

        let err = outbox.dispatch_once().await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Cancelled {
                operation: "reserve_new_events"
            }
        ));
    }

    #[tokio::test]
    async fn test_tick_dropped_while_cycle_runs() {
        let (outbox, _broker, db) = engine_with_capacity(16).await;
        outbox.add_new_event(create()).await.unwrap();

        let guard = CycleGuard::try_acquire(&outbox.inner).unwrap();
        outbox.start().unwrap();

        // First tick fires at one interval and finds the flag taken.
        tokio::time::sleep(Duration::from_millis(5_300)).await;
        assert_eq!(counts(&db).await.new, 1);

        // Releasing the flag does not replay the dropped tick.
        drop(guard);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counts(&db).await.new, 1);

        // The next tick dispatches normally.
        assert!(eventually(Duration::from_secs(6), || async { counts(&db).await.new == 0 }).await);

        outbox.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_cycle() {
        // Input holds one message and nobody reads it, so the rest of the
        // batch blocks for the full process timeout.
        let (outbox, _broker, db) = engine_with_capacity(1).await;
        for _ in 0..3 {
            outbox.add_new_event(create()).await.unwrap();
        }
        outbox.start().unwrap();

        let inner = Arc::clone(&outbox.inner);
        assert!(
            eventually(Duration::from_secs(7), || {
                let inner = Arc::clone(&inner);
                async move { inner.in_process.load(Ordering::SeqCst) }
            })
            .await
        );

        let started = Instant::now();
        outbox.stop(Duration::from_secs(2)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outbox.state(), EngineState::Stopped);
        assert!(!outbox.inner.in_process.load(Ordering::SeqCst));
        assert!(outbox.inner.tracker.is_empty());

        // Abandoned publishes keep their lease.
        assert_eq!(counts(&db).await.reserved, 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_cycle_counts_abandoned_publishes() {
        let (outbox, _broker, _db) = engine_with_capacity(1).await;
        for _ in 0..3 {
            outbox.add_new_event(create()).await.unwrap();
        }

        let (outcome, ()) = tokio::join!(outbox.dispatch_once(), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            outbox.inner.cancel.cancel();
        });

        assert_eq!(
            outcome.unwrap(),
            CycleOutcome::Dispatched {
                reserved: 3,
                failed: 2
            }
        );
    }

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Stopping.to_string(), "stopping");
        assert_eq!(EngineState::Created.as_str(), "created");
    }
}
