// SPDX-License-Identifier: MIT OR Apache-2.0
//! Non-blocking record producer with asynchronous delivery reports.
//!
//! [`Producer::publish`] only enqueues. A dispatcher task drains the queue,
//! keeps up to `max_in_flight` sends running against a [`RecordTransport`],
//! and emits one [`DeliveryReport`] per record on the [`DeliveryReports`]
//! channel. Reports may arrive out of publish order.

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{DeliveryError, DeliveryReport, PublishRequest};
use relay_error::{Classify, ErrorCode};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Where a delivered record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    /// Partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Sends one record to the log service.
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Deliver `record`, returning its position.
    async fn send(&self, record: &PublishRequest) -> Result<RecordPosition, DeliveryError>;
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Synchronous rejection of a publish.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The local queue is at capacity.
    #[error("producer queue full")]
    QueueFull,
    /// The producer has been closed.
    #[error("producer closed")]
    Closed,
}

impl Classify for PublishError {
    fn code(&self) -> ErrorCode {
        ErrorCode::PublishRejected
    }
}

/// The publish side of a producer, plus the shutdown operations.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Enqueue a record without waiting for delivery.
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError>;

    /// Wait up to `timeout` for queued and in-flight records; returns the
    /// number still outstanding.
    async fn flush(&self, timeout: Duration) -> usize;

    /// Stop delivering. Unflushed records are dropped and the report
    /// channel closes.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Producer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Records the local queue holds before `publish` fails with
    /// [`PublishError::QueueFull`].
    pub queue_capacity: usize,
    /// Sends running concurrently.
    pub max_in_flight: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_in_flight: 16,
        }
    }
}

/// Receiving end of a producer's delivery reports.
#[derive(Debug)]
pub struct DeliveryReports {
    rx: mpsc::Receiver<DeliveryReport>,
}

impl DeliveryReports {
    /// Wrap a receiver.
    pub fn new(rx: mpsc::Receiver<DeliveryReport>) -> Self {
        Self { rx }
    }

    /// The next report, or `None` once the producer is closed.
    pub async fn recv(&mut self) -> Option<DeliveryReport> {
        self.rx.recv().await
    }
}

struct Shared {
    outstanding: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// A running producer.
pub struct Producer {
    queue: mpsc::Sender<PublishRequest>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Start a producer over `transport`. Must be called inside a Tokio
    /// runtime.
    pub fn start(
        transport: Arc<dyn RecordTransport>,
        settings: ProducerSettings,
    ) -> (Self, DeliveryReports) {
        let capacity = settings.queue_capacity.max(1);
        let (queue, rx) = mpsc::channel(capacity);
        let (reports_tx, reports_rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(dispatch(
            rx,
            transport,
            settings.max_in_flight.max(1),
            reports_tx,
            shared.clone(),
        ));

        let producer = Self {
            queue,
            shared,
            dispatcher: Mutex::new(Some(handle)),
        };
        (producer, DeliveryReports::new(reports_rx))
    }

    /// Records queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Whether [`close`](Publisher::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for Producer {
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        match self.queue.try_send(request) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.finish_one();
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(PublishError::QueueFull),
                    mpsc::error::TrySendError::Closed(_) => Err(PublishError::Closed),
                }
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.shared.idle.notified();
            let remaining = self.outstanding();
            if remaining == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                let remaining = self.outstanding();
                warn!(target: "relay.producer", remaining, "flush timed out");
                return remaining;
            }
        }
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            let dropped = self.shared.outstanding.swap(0, Ordering::SeqCst);
            self.shared.idle.notify_waiters();
            info!(target: "relay.producer", dropped, "producer closed");
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(handle) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn dispatch(
    rx: mpsc::Receiver<PublishRequest>,
    transport: Arc<dyn RecordTransport>,
    max_in_flight: usize,
    reports: mpsc::Sender<DeliveryReport>,
    shared: Arc<Shared>,
) {
    ReceiverStream::new(rx)
        .map(|record| {
            let transport = transport.clone();
            async move {
                match transport.send(&record).await {
                    Ok(pos) => DeliveryReport::delivered(record.topic, pos.partition, pos.offset),
                    Err(err) => DeliveryReport::failed(record.topic, err),
                }
            }
        })
        .buffer_unordered(max_in_flight)
        .for_each(|report| {
            let reports = reports.clone();
            let shared = shared.clone();
            async move {
                if reports.send(report).await.is_err() {
                    debug!(target: "relay.producer", "delivery report dropped, no receiver");
                }
                shared.finish_one();
            }
        })
        .await;
}
