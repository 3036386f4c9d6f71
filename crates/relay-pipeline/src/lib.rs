// SPDX-License-Identifier: MIT OR Apache-2.0
//! The relay proper: a forward task moving stream events into the
//! producer, and a drain task consuming the producer's delivery reports.
//!
//! Each task owns one channel end. The forward task owns the
//! [`EventStream`] and the sending half of the stream-error channel; the
//! drain task owns the [`DeliveryReports`] receiver. A stream error ends the
//! forward task and is handed to whoever holds [`RelayPipeline::take_errors`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod state;

pub use state::{PipelineState, PipelineTransition};

use relay_core::{Decoded, PublishRequest, StreamEvent};
use relay_error::{Classify, ErrorCode};
use relay_log::{DeliveryReports, Publisher};
use relay_provider::{EventStream, StopHandle, StreamError};
use serde::{Deserialize, Serialize};
use state::Lifecycle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the record key is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The same key for every record.
    Fixed(String),
    /// The event id.
    EventId,
}

impl KeyStrategy {
    /// Key for `event`.
    pub fn key_for(&self, event: &StreamEvent) -> String {
        match self {
            Self::Fixed(key) => key.clone(),
            Self::EventId => event.id.clone(),
        }
    }
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::Fixed("tweet".into())
    }
}

/// Where and how events are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Destination topic.
    pub topic: String,
    /// Record key choice.
    pub key: KeyStrategy,
}

impl PipelineConfig {
    /// Publish to `topic` with the default key.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: KeyStrategy::default(),
        }
    }

    /// Use `key` for record keys.
    #[must_use]
    pub fn with_key(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters collected while relaying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Events handed to the producer.
    pub forwarded: u64,
    /// Payloads dropped because they did not decode.
    pub malformed: u64,
    /// Events dropped because the producer refused them.
    pub rejected: u64,
    /// Records the log acknowledged.
    pub delivered: u64,
    /// Records the log reported as failed.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    malformed: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from driving the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The requested operation is not valid in the current state.
    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: PipelineState,
        /// Requested state.
        to: PipelineState,
    },

    /// A pipeline task panicked or was cancelled.
    #[error("{task} task failed: {reason}")]
    TaskFailed {
        /// Which task.
        task: &'static str,
        /// Join error detail.
        reason: String,
    },
}

impl Classify for PipelineError {
    fn code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Forward and drain tasks plus their lifecycle.
#[derive(Debug)]
pub struct RelayPipeline {
    config: PipelineConfig,
    lifecycle: Lifecycle,
    counters: Arc<Counters>,
    errors_tx: Option<mpsc::Sender<StreamError>>,
    errors_rx: Option<mpsc::Receiver<StreamError>>,
    stop: Option<StopHandle>,
    forward: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
}

impl RelayPipeline {
    /// An idle pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Self {
            config,
            lifecycle: Lifecycle::new(),
            counters: Arc::new(Counters::default()),
            errors_tx: Some(errors_tx),
            errors_rx: Some(errors_rx),
            stop: None,
            forward: None,
            drain: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    /// Every transition so far.
    pub fn history(&self) -> &[PipelineTransition] {
        self.lifecycle.history()
    }

    /// Counters so far.
    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    /// Receiver of the stream error that ended the forward task, if any.
    /// Available once.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<StreamError>> {
        self.errors_rx.take()
    }

    /// Spawn the forward and drain tasks.
    ///
    /// `stop` must be the stop handle of the source that produced `events`.
    pub fn start(
        &mut self,
        events: EventStream,
        stop: StopHandle,
        publisher: Arc<dyn Publisher>,
        reports: DeliveryReports,
    ) -> Result<(), PipelineError> {
        self.transition(PipelineState::Running)?;
        let errors = self.errors_tx.take().ok_or(PipelineError::InvalidTransition {
            from: PipelineState::Running,
            to: PipelineState::Running,
        })?;

        info!(target: "relay.pipeline", topic = %self.config.topic, "pipeline starting");
        self.forward = Some(tokio::spawn(forward_loop(
            events,
            stop.clone(),
            publisher,
            errors,
            self.config.clone(),
            self.counters.clone(),
        )));
        self.drain = Some(tokio::spawn(drain_loop(reports, self.counters.clone())));
        self.stop = Some(stop);
        Ok(())
    }

    /// Stop the source and wait for the forward task to finish.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        self.transition(PipelineState::Stopping)?;
        if let Some(stop) = &self.stop {
            stop.stop();
        }
        if let Some(handle) = self.forward.take() {
            if let Err(e) = handle.await {
                return Err(self.fail("forward", e));
            }
        }
        debug!(target: "relay.pipeline", "forward task finished");
        Ok(())
    }

    /// Wait for the drain task to observe the report channel closing.
    ///
    /// Returns only after the producer has been closed.
    pub async fn join(&mut self) -> Result<RelayStats, PipelineError> {
        if self.state() != PipelineState::Stopping {
            return Err(PipelineError::InvalidTransition {
                from: self.state(),
                to: PipelineState::Stopped,
            });
        }
        if let Some(handle) = self.drain.take() {
            if let Err(e) = handle.await {
                return Err(self.fail("drain", e));
            }
        }
        self.transition(PipelineState::Stopped)?;
        let stats = self.stats();
        info!(
            target: "relay.pipeline",
            forwarded = stats.forwarded,
            delivered = stats.delivered,
            failed = stats.failed,
            malformed = stats.malformed,
            rejected = stats.rejected,
            "pipeline stopped"
        );
        Ok(stats)
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), PipelineError> {
        self.lifecycle
            .transition(to)
            .map_err(|from| PipelineError::InvalidTransition { from, to })
    }

    fn fail(&mut self, task: &'static str, err: tokio::task::JoinError) -> PipelineError {
        let _ = self.lifecycle.transition(PipelineState::Failed);
        error!(target: "relay.pipeline", task, error = %err, "pipeline task failed");
        PipelineError::TaskFailed {
            task,
            reason: err.to_string(),
        }
    }
}

impl Drop for RelayPipeline {
    fn drop(&mut self) {
        for handle in [self.forward.take(), self.drain.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn forward_loop(
    mut events: EventStream,
    stop: StopHandle,
    publisher: Arc<dyn Publisher>,
    errors: mpsc::Sender<StreamError>,
    config: PipelineConfig,
    counters: Arc<Counters>,
) {
    loop {
        // Buffered events are forwarded before a stop request is honoured.
        let item = tokio::select! {
            biased;
            item = events.next() => item,
            _ = stop.stopped() => break,
        };
        let Some(item) = item else {
            debug!(target: "relay.pipeline", "event stream ended");
            break;
        };

        match item {
            Err(err) => {
                error!(target: "relay.pipeline", error = %err, "stream failed");
                let _ = errors.send(err).await;
                break;
            }
            Ok(Decoded::Malformed { reason, raw }) => {
                Counters::bump(&counters.malformed);
                debug!(
                    target: "relay.pipeline",
                    code = ErrorCode::DecodeFailed.as_str(),
                    reason = %reason,
                    bytes = raw.len(),
                    "dropping undecodable payload"
                );
            }
            Ok(Decoded::Event(event)) => {
                let request = PublishRequest::new(
                    config.topic.clone(),
                    config.key.key_for(&event),
                    event.text,
                );
                match publisher.publish(request) {
                    Ok(()) => Counters::bump(&counters.forwarded),
                    Err(err) => {
                        Counters::bump(&counters.rejected);
                        warn!(
                            target: "relay.pipeline",
                            event_id = %event.id,
                            error = %err,
                            "publish rejected, dropping event"
                        );
                    }
                }
            }
        }
    }
}

async fn drain_loop(mut reports: DeliveryReports, counters: Arc<Counters>) {
    while let Some(report) = reports.recv().await {
        match &report.error {
            None => {
                Counters::bump(&counters.delivered);
                info!(
                    target: "relay.pipeline",
                    topic = %report.topic,
                    partition = ?report.partition,
                    offset = ?report.offset,
                    "record delivered"
                );
            }
            Some(err) => {
                Counters::bump(&counters.failed);
                warn!(
                    target: "relay.pipeline",
                    topic = %report.topic,
                    error = %err,
                    "delivery failed"
                );
            }
        }
    }
    debug!(target: "relay.pipeline", "delivery reports closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> StreamEvent {
        StreamEvent {
            id: id.into(),
            text: format!("text {id}"),
            created_at: None,
            author_id: None,
            matching_rule_ids: Default::default(),
        }
    }

    #[test]
    fn key_strategies() {
        let ev = event("42");
        assert_eq!(KeyStrategy::default().key_for(&ev), "tweet");
        assert_eq!(KeyStrategy::Fixed("k".into()).key_for(&ev), "k");
        assert_eq!(KeyStrategy::EventId.key_for(&ev), "42");
    }

    #[tokio::test]
    async fn stop_before_start_is_invalid() {
        let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
        let err = pipeline.stop().await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidTransition {
                from: PipelineState::Idle,
                to: PipelineState::Stopping
            }
        );
    }

    #[tokio::test]
    async fn join_requires_stopping() {
        let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
        assert!(pipeline.join().await.is_err());
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn errors_receiver_is_taken_once() {
        let mut pipeline = RelayPipeline::new(PipelineConfig::new("tweets"));
        assert!(pipeline.take_errors().is_some());
        assert!(pipeline.take_errors().is_none());
    }
}
