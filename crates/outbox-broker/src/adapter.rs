//! Broker adapter: publish with correlation metadata, demultiplex acks.

use crate::{
    BrokerError, BrokerResult, FailedEvent, Producer, ProducerError, ProducerMessage,
    SuccessEvent,
};
use outbox_database::Event;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer between an ack pump and the engine loop consuming it.
const ACK_BUFFER: usize = 64;

/// Shared handle to one acknowledgement stream.
///
/// Clones read from the same underlying channel. `recv` returns `None` once
/// the pump feeding the stream has stopped.
pub struct AckStream<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for AckStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> AckStream<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Receive the next acknowledgement.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Whether both handles read from the same stream.
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Adapter between the engine and a `Producer`.
pub struct BrokerAdapter {
    producer: Arc<dyn Producer>,
    successes: OnceLock<AckStream<SuccessEvent>>,
    errors: OnceLock<AckStream<FailedEvent>>,
}

impl BrokerAdapter {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self {
            producer,
            successes: OnceLock::new(),
            errors: OnceLock::new(),
        }
    }

    /// Hand an event to the producer input.
    ///
    /// Races the send against `cancel` and `timeout`; whichever resolves
    /// first decides the outcome. The event's lease is not touched here.
    pub async fn publish(
        &self,
        event: &Event,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> BrokerResult<()> {
        let message = ProducerMessage::from_event(event);
        let input = self.producer.input();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BrokerError::Cancelled {
                event_id: event.id.clone(),
            }),
            _ = tokio::time::sleep(timeout) => Err(BrokerError::Timeout {
                event_id: event.id.clone(),
                timeout,
            }),
            sent = input.send(message) => sent.map_err(|_| BrokerError::InputClosed {
                event_id: event.id.clone(),
            }),
        }
    }

    /// Stream of confirmed deliveries.
    ///
    /// The first call starts the pump; later calls return the same stream.
    /// Must be called from within a Tokio runtime.
    pub fn successes(&self, cancel: &CancellationToken) -> AckStream<SuccessEvent> {
        self.successes
            .get_or_init(|| {
                spawn_pump(
                    "successes",
                    cancel.clone(),
                    self.producer.take_successes(),
                    |msg: ProducerMessage| {
                        msg.correlation().map(|m| SuccessEvent {
                            id: m.id.clone(),
                            event_type: m.event_type.clone(),
                        })
                    },
                )
            })
            .clone()
    }

    /// Stream of failed deliveries.
    ///
    /// The first call starts the pump; later calls return the same stream.
    /// Must be called from within a Tokio runtime.
    pub fn errors(&self, cancel: &CancellationToken) -> AckStream<FailedEvent> {
        self.errors
            .get_or_init(|| {
                spawn_pump(
                    "errors",
                    cancel.clone(),
                    self.producer.take_errors(),
                    |err: ProducerError| {
                        let reason = err.reason;
                        err.message.correlation().map(|m| FailedEvent {
                            id: m.id.clone(),
                            event_type: m.event_type.clone(),
                            error: BrokerError::Rejected {
                                event_id: m.id.clone(),
                                reason,
                            },
                        })
                    },
                )
            })
            .clone()
    }
}

/// Forward raw outcomes from `upstream` as correlated records.
///
/// Outcomes without decodable metadata are dropped. The downstream sender is
/// dropped when the pump exits, which closes the returned stream.
fn spawn_pump<U, T, F>(
    stream: &'static str,
    cancel: CancellationToken,
    upstream: Option<mpsc::Receiver<U>>,
    correlate: F,
) -> AckStream<T>
where
    U: Send + 'static,
    T: Send + 'static,
    F: Fn(U) -> Option<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ACK_BUFFER);

    let Some(mut upstream) = upstream else {
        warn!(stream, "Producer stream already taken, acknowledgements unavailable");
        return AckStream::new(rx);
    };

    tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(stream, "Ack pump stopped: cancelled");
                    break;
                }
                raw = upstream.recv() => match raw {
                    Some(raw) => raw,
                    None => {
                        debug!(stream, "Ack pump stopped: upstream closed");
                        break;
                    }
                },
            };

            let Some(record) = correlate(raw) else {
                debug!(stream, "Dropping acknowledgement without correlation metadata");
                continue;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(stream, "Ack pump stopped: cancelled");
                    break;
                }
                sent = tx.send(record) => {
                    if sent.is_err() {
                        debug!(stream, "Ack pump stopped: no consumer");
                        break;
                    }
                }
            }
        }
    });

    AckStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBroker, MemoryProducer};
    use chrono::Utc;
    use outbox_database::EventStatus;

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            aggregate_id: "agg".to_string(),
            topic: "orders".to_string(),
            event_type: "OrderCreated".to_string(),
            payload: b"{}".to_vec(),
            status: EventStatus::New,
            created_at: Utc::now(),
            reserved_to: None,
        }
    }

    fn adapter(capacity: usize) -> (BrokerAdapter, MemoryBroker) {
        let (producer, broker) = MemoryProducer::new(capacity);
        (BrokerAdapter::new(Arc::new(producer)), broker)
    }

    #[tokio::test]
    async fn test_publish_and_ack_success() {
        let (adapter, mut broker) = adapter(8);
        let cancel = CancellationToken::new();
        let successes = adapter.successes(&cancel);

        adapter
            .publish(&event("e1"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();

        let msg = broker.next_message().await.unwrap();
        assert_eq!(msg.key, "agg");
        assert!(broker.ack(msg).await);

        let ack = successes.recv().await.unwrap();
        assert_eq!(
            ack,
            SuccessEvent {
                id: "e1".to_string(),
                event_type: "OrderCreated".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_reject_delivers_failed_event() {
        let (adapter, mut broker) = adapter(8);
        let cancel = CancellationToken::new();
        let errors = adapter.errors(&cancel);

        adapter
            .publish(&event("e2"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();
        let msg = broker.next_message().await.unwrap();
        assert!(broker.reject(msg, "message too large").await);

        let failed = errors.recv().await.unwrap();
        assert_eq!(failed.id, "e2");
        assert_eq!(
            failed.error,
            BrokerError::Rejected {
                event_id: "e2".to_string(),
                reason: "message too large".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_is_idempotent() {
        let (adapter, mut broker) = adapter(8);
        let cancel = CancellationToken::new();

        let first = adapter.successes(&cancel);
        let second = adapter.successes(&cancel);
        assert!(first.same_stream(&second));
        assert!(adapter.errors(&cancel).same_stream(&adapter.errors(&cancel)));

        adapter
            .publish(&event("e1"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();
        let msg = broker.next_message().await.unwrap();
        broker.ack(msg).await;

        assert_eq!(first.recv().await.unwrap().id, "e1");

        // A single ack is delivered once across all handles.
        let again = tokio::time::timeout(Duration::from_millis(100), second.recv()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_undecodable_metadata_is_dropped() {
        let (adapter, mut broker) = adapter(8);
        let cancel = CancellationToken::new();
        let successes = adapter.successes(&cancel);

        adapter
            .publish(&event("e1"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();
        adapter
            .publish(&event("e2"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();

        let mut foreign = broker.next_message().await.unwrap();
        foreign.metadata = Some(Arc::new(42u32));
        broker.ack(foreign).await;

        let valid = broker.next_message().await.unwrap();
        broker.ack(valid).await;

        assert_eq!(successes.recv().await.unwrap().id, "e2");
    }

    #[tokio::test]
    async fn test_publish_timeout_when_input_full() {
        let (adapter, _broker) = adapter(1);
        let cancel = CancellationToken::new();

        adapter
            .publish(&event("e1"), &cancel, Duration::from_secs(1))
            .await
            .unwrap();

        let err = adapter
            .publish(&event("e2"), &cancel, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BrokerError::Timeout {
                event_id: "e2".to_string(),
                timeout: Duration::from_millis(50),
            }
        );
    }

    #[tokio::test]
    async fn test_publish_cancelled() {
        let (adapter, _broker) = adapter(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = adapter
            .publish(&event("e1"), &cancel, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_publish_input_closed() {
        let (adapter, broker) = adapter(1);
        drop(broker);

        let err = adapter
            .publish(&event("e1"), &CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InputClosed { .. }));
    }

    #[tokio::test]
    async fn test_streams_close_on_cancel() {
        let (adapter, _broker) = adapter(1);
        let cancel = CancellationToken::new();
        let successes = adapter.successes(&cancel);
        let errors = adapter.errors(&cancel);

        cancel.cancel();

        assert!(successes.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_streams_close_when_upstream_closes() {
        let (adapter, broker) = adapter(1);
        let cancel = CancellationToken::new();
        let successes = adapter.successes(&cancel);

        drop(broker);

        assert!(successes.recv().await.is_none());
    }
}
