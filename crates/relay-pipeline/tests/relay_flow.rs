// SPDX-License-Identifier: MIT OR Apache-2.0
//! Forward and drain behaviour of the pipeline.

use async_trait::async_trait;
use relay_core::{Decoded, PublishRequest, StreamEvent, decode_payload};
use relay_log::{
    DeliveryReports, MemoryTransport, Producer, ProducerSettings, PublishError, Publisher,
};
use relay_pipeline::{KeyStrategy, PipelineConfig, PipelineState, RelayPipeline};
use relay_provider::{EventStream, StopHandle, StreamError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<PublishRequest>>,
    refuse: bool,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        if self.refuse {
            return Err(PublishError::QueueFull);
        }
        self.published.lock().unwrap().push(request);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        0
    }

    async fn close(&self) {}
}

fn event(id: &str, text: &str) -> Decoded {
    Decoded::Event(StreamEvent {
        id: id.into(),
        text: text.into(),
        created_at: None,
        author_id: None,
        matching_rule_ids: Default::default(),
    })
}

fn closed_reports() -> DeliveryReports {
    let (_tx, rx) = mpsc::channel(1);
    DeliveryReports::new(rx)
}

async fn run_to_end(
    pipeline: &mut RelayPipeline,
    items: Vec<Result<Decoded, StreamError>>,
    publisher: Arc<dyn Publisher>,
    reports: DeliveryReports,
) {
    let (tx, events) = EventStream::channel(16);
    for item in items {
        tx.send(item).await.unwrap();
    }
    drop(tx);
    pipeline
        .start(events, StopHandle::new(), publisher, reports)
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_payload_is_skipped_and_order_kept() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
    run_to_end(
        &mut pipeline,
        vec![
            Ok(event("1", "first")),
            Ok(decode_payload(b"{broken")),
            Ok(event("3", "third")),
        ],
        publisher.clone(),
        closed_reports(),
    )
    .await;

    pipeline.stop().await.unwrap();
    let stats = pipeline.join().await.unwrap();

    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(
        published,
        vec![
            PublishRequest::new("tweets", "tweet", "first"),
            PublishRequest::new("tweets", "tweet", "third"),
        ]
    );
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn stream_error_reaches_error_channel() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
    let mut errors = pipeline.take_errors().unwrap();
    run_to_end(
        &mut pipeline,
        vec![
            Ok(event("1", "first")),
            Err(StreamError::Disconnected),
            Ok(event("2", "never")),
        ],
        publisher.clone(),
        closed_reports(),
    )
    .await;

    let err = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(err, StreamError::Disconnected);

    pipeline.stop().await.unwrap();
    pipeline.join().await.unwrap();
    assert_eq!(publisher.published.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn refused_publish_drops_event_and_continues() {
    let publisher = Arc::new(RecordingPublisher {
        refuse: true,
        ..Default::default()
    });
    let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
    run_to_end(
        &mut pipeline,
        vec![Ok(event("1", "a")), Ok(event("2", "b"))],
        publisher,
        closed_reports(),
    )
    .await;
    pipeline.stop().await.unwrap();
    let stats = pipeline.join().await.unwrap();
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.forwarded, 0);
}

#[tokio::test]
async fn stop_interrupts_a_quiet_stream() {
    let publisher = Arc::new(RecordingPublisher::default());
    let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
    let (_tx, events) = EventStream::channel(16);
    let stop = StopHandle::new();
    pipeline
        .start(events, stop.clone(), publisher, closed_reports())
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), pipeline.stop())
        .await
        .expect("forward task ends on stop")
        .unwrap();
    assert!(stop.is_stopped());
}

#[tokio::test]
async fn delivery_reports_are_counted_through_the_producer() {
    let log = Arc::new(MemoryTransport::new());
    log.ensure_topic("tweets", 3);
    let (producer, reports) = Producer::start(log.clone(), ProducerSettings::default());
    let producer = Arc::new(producer);

    let mut pipeline =
        RelayPipeline::new(PipelineConfig::new("tweets").with_key(KeyStrategy::EventId));
    run_to_end(
        &mut pipeline,
        vec![Ok(event("10", "a")), Ok(event("11", "b"))],
        producer.clone(),
        reports,
    )
    .await;

    pipeline.stop().await.unwrap();
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    producer.close().await;
    let stats = pipeline.join().await.unwrap();

    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.failed, 0);
    let keys: Vec<String> = log.records("tweets").into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["10", "11"]);
}
