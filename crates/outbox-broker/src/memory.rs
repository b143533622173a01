//! In-process producer.
//!
//! `MemoryProducer` implements `Producer` over tokio channels. The paired
//! `MemoryBroker` plays the broker: it reads published messages and decides
//! whether each one is acknowledged or rejected.

use crate::{Producer, ProducerError, ProducerMessage, HEADER_EVENT_ID, HEADER_EVENT_TYPE};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Producer backed by in-memory channels.
pub struct MemoryProducer {
    input: mpsc::Sender<ProducerMessage>,
    successes: Mutex<Option<mpsc::Receiver<ProducerMessage>>>,
    errors: Mutex<Option<mpsc::Receiver<ProducerError>>>,
}

/// Broker side of a `MemoryProducer`.
pub struct MemoryBroker {
    input: mpsc::Receiver<ProducerMessage>,
    successes: mpsc::Sender<ProducerMessage>,
    errors: mpsc::Sender<ProducerError>,
}

impl MemoryProducer {
    /// Create a producer whose input holds at most `capacity` unread messages.
    pub fn new(capacity: usize) -> (Self, MemoryBroker) {
        let capacity = capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (success_tx, success_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);

        let producer = Self {
            input: input_tx,
            successes: Mutex::new(Some(success_rx)),
            errors: Mutex::new(Some(error_rx)),
        };
        let broker = MemoryBroker {
            input: input_rx,
            successes: success_tx,
            errors: error_tx,
        };
        (producer, broker)
    }
}

impl Producer for MemoryProducer {
    fn input(&self) -> mpsc::Sender<ProducerMessage> {
        self.input.clone()
    }

    fn take_successes(&self) -> Option<mpsc::Receiver<ProducerMessage>> {
        self.successes.lock().take()
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<ProducerError>> {
        self.errors.lock().take()
    }
}

impl MemoryBroker {
    /// Wait for the next published message. `None` once every producer
    /// input sender is gone.
    pub async fn next_message(&mut self) -> Option<ProducerMessage> {
        self.input.recv().await
    }

    /// Take a published message if one is waiting.
    pub fn try_next_message(&mut self) -> Option<ProducerMessage> {
        self.input.try_recv().ok()
    }

    /// Report successful delivery. Returns false if nobody is listening.
    pub async fn ack(&self, message: ProducerMessage) -> bool {
        self.successes.send(message).await.is_ok()
    }

    /// Report failed delivery. Returns false if nobody is listening.
    pub async fn reject(&self, message: ProducerMessage, reason: impl Into<String>) -> bool {
        self.errors
            .send(ProducerError {
                message,
                reason: reason.into(),
            })
            .await
            .is_ok()
    }

    /// Log and acknowledge every message until cancelled or the input closes.
    pub fn spawn_auto_ack(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = self.next_message() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                info!(
                    topic = %message.topic,
                    key = %message.key,
                    event_id = %header_str(&message, HEADER_EVENT_ID),
                    event_type = %header_str(&message, HEADER_EVENT_TYPE),
                    bytes = message.value.len(),
                    "Message delivered"
                );

                if !self.ack(message).await {
                    break;
                }
            }
            debug!("Auto-ack broker stopped");
        })
    }
}

fn header_str<'a>(message: &'a ProducerMessage, key: &str) -> std::borrow::Cow<'a, str> {
    String::from_utf8_lossy(message.header(key).unwrap_or_default())
}
