// SPDX-License-Identifier: MIT OR Apache-2.0
//! Top-level orchestration of one relay run.
//!
//! The supervisor walks a fixed sequence of phases: ensure the topic,
//! authenticate, reconcile rules, open the stream, then relay until a
//! termination request or a stream error. Shutdown always runs in the same
//! order: stop the source, flush the producer, close it, join the pipeline.

use crate::components::Components;
use crate::phase::{PhaseTracker, PhaseTransition, SupervisorPhase};
use relay_config::RelayConfig;
use relay_core::RuleSet;
use relay_error::{Classify, ErrorCode, RelayError};
use relay_log::{AdminError, Producer, ProducerSettings, Publisher, RecordTransport, TopicAdmin};
use relay_pipeline::{KeyStrategy, PipelineConfig, PipelineError, RelayPipeline, RelayStats};
use relay_provider::{
    AuthError, EventStream, ResetSummary, RuleSyncError, RuleSynchronizer, StreamError,
    StreamProvider, StreamQuery, StreamSource, SyncSummary,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default bound on the final producer flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// What the supervisor relays and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Destination topic.
    pub topic: String,
    /// Message key strategy.
    pub key: KeyStrategy,
    /// Producer queue and concurrency.
    pub producer: ProducerSettings,
    /// Delete every remote rule before applying the desired set.
    pub reset_rules: bool,
    /// Bound on the final flush; records still queued afterwards are dropped.
    pub flush_timeout: Duration,
}

impl SupervisorSettings {
    /// Defaults for everything but the topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: KeyStrategy::default(),
            producer: ProducerSettings::default(),
            reset_rules: false,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Settings taken from a validated configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        let key = if config.log.key_by_event_id {
            KeyStrategy::EventId
        } else {
            KeyStrategy::Fixed(config.log.message_key.clone())
        };
        Self {
            topic: config.log.topic.clone(),
            key,
            producer: ProducerSettings {
                queue_capacity: config.log.queue_capacity,
                max_in_flight: config.log.max_in_flight,
            },
            reset_rules: config.reset_rules,
            flush_timeout: config.timeouts.flush(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a run ended unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The destination topic could not be ensured.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// No bearer token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The remote rule set could not be reconciled.
    #[error(transparent)]
    Rules(#[from] RuleSyncError),

    /// The stream could not be opened, or it failed while relaying.
    #[error("stream failed: {0}")]
    Stream(#[from] StreamError),

    /// A pipeline task failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A phase was entered out of order.
    #[error("invalid supervisor transition from {from} to {to}")]
    Phase {
        /// Current phase.
        from: SupervisorPhase,
        /// Requested phase.
        to: SupervisorPhase,
    },
}

impl Classify for SupervisorError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Admin(e) => e.code(),
            Self::Auth(e) => e.code(),
            Self::Rules(e) => e.code(),
            Self::Stream(e) => e.code(),
            Self::Pipeline(e) => e.code(),
            Self::Phase { .. } => ErrorCode::Internal,
        }
    }
}

impl From<SupervisorError> for RelayError {
    fn from(err: SupervisorError) -> Self {
        let mut relay = RelayError::new(err.code(), err.to_string());
        if let SupervisorError::Rules(RuleSyncError::InvalidRule { title, value }) = &err {
            relay = relay.with_context("title", title).with_context("value", value);
        }
        relay.with_source(err)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of a run that reached `Terminated` without a stream error.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final phase.
    pub phase: SupervisorPhase,
    /// Every phase change.
    pub history: Vec<PhaseTransition>,
    /// Pipeline counters.
    pub stats: RelayStats,
    /// Rule reconciliation outcome.
    pub sync: SyncSummary,
    /// Rule reset outcome, when a reset was requested.
    pub reset: Option<ResetSummary>,
    /// Records dropped because the final flush timed out.
    pub unflushed: usize,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Started {
    sync: SyncSummary,
    reset: Option<ResetSummary>,
    source: Arc<dyn StreamSource>,
    events: EventStream,
}

/// Drives one relay run from topic creation to termination.
pub struct Supervisor {
    admin: TopicAdmin,
    provider: Arc<dyn StreamProvider>,
    transport: Arc<dyn RecordTransport>,
    settings: SupervisorSettings,
    desired: RuleSet,
    phases: PhaseTracker,
    stats: Option<RelayStats>,
}

impl Supervisor {
    /// A supervisor that will register `desired` and relay into `settings.topic`.
    pub fn new(components: Components, settings: SupervisorSettings, desired: RuleSet) -> Self {
        Self {
            admin: components.admin,
            provider: components.provider,
            transport: components.transport,
            settings,
            desired,
            phases: PhaseTracker::new(),
            stats: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SupervisorPhase {
        self.phases.phase()
    }

    /// Every phase change so far.
    pub fn history(&self) -> &[PhaseTransition] {
        self.phases.history()
    }

    /// Pipeline counters of the finished run, including a run that ended on
    /// a stream error.
    pub fn stats(&self) -> Option<RelayStats> {
        self.stats
    }

    /// Run until `shutdown` resolves or the stream fails.
    ///
    /// # Errors
    ///
    /// Any failure before relaying starts moves the supervisor to `Failed`.
    /// A stream error while relaying still shuts down in order, ends in
    /// `Terminated`, and is returned as [`SupervisorError::Stream`].
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunReport, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let (producer, reports) =
            Producer::start(self.transport.clone(), self.settings.producer);
        let producer = Arc::new(producer);

        let started = match self.start_up().await {
            Ok(started) => started,
            Err(e) => return Err(self.abort(e, &producer).await),
        };

        let mut pipeline = RelayPipeline::new(
            PipelineConfig::new(self.settings.topic.clone()).with_key(self.settings.key.clone()),
        );
        let mut errors = match pipeline.take_errors() {
            Some(rx) => rx,
            None => {
                let e = SupervisorError::Pipeline(PipelineError::InvalidTransition {
                    from: pipeline.state(),
                    to: pipeline.state(),
                });
                return Err(self.abort(e, &producer).await);
            }
        };
        let publisher: Arc<dyn Publisher> = producer.clone();
        if let Err(e) = pipeline.start(
            started.events,
            started.source.stop_handle(),
            publisher,
            reports,
        ) {
            started.source.stop();
            return Err(self.abort(e.into(), &producer).await);
        }

        if let Err(e) = self.enter(SupervisorPhase::AwaitingTermination) {
            started.source.stop();
            return Err(self.abort(e, &producer).await);
        }
        info!(target: "relay.supervisor", topic = %self.settings.topic, "relaying");

        let stream_error = tokio::select! {
            () = shutdown => {
                info!(target: "relay.supervisor", "termination requested");
                None
            }
            err = errors.recv() => {
                let err = err.unwrap_or(StreamError::Disconnected);
                error!(target: "relay.supervisor", error = %err, "stream failed");
                Some(err)
            }
        };

        self.enter(SupervisorPhase::ShuttingDown)?;
        let stopped = pipeline.stop().await;
        let unflushed = producer.flush(self.settings.flush_timeout).await;
        if unflushed > 0 {
            warn!(
                target: "relay.supervisor",
                unflushed,
                timeout_ms = self.settings.flush_timeout.as_millis() as u64,
                "flush timed out, dropping queued records"
            );
        }
        producer.close().await;
        let joined = match stopped {
            Ok(()) => pipeline.join().await,
            Err(e) => Err(e),
        };
        let stats = match joined {
            Ok(stats) => stats,
            Err(e) => {
                let _ = self.phases.transition(SupervisorPhase::Failed);
                return Err(e.into());
            }
        };
        self.stats = Some(stats);

        self.enter(SupervisorPhase::Terminated)?;
        info!(
            target: "relay.supervisor",
            forwarded = stats.forwarded,
            delivered = stats.delivered,
            failed = stats.failed,
            unflushed,
            "relay terminated"
        );

        if let Some(err) = stream_error {
            return Err(SupervisorError::Stream(err));
        }
        Ok(RunReport {
            phase: self.phase(),
            history: self.history().to_vec(),
            stats,
            sync: started.sync,
            reset: started.reset,
            unflushed,
        })
    }

    async fn start_up(&mut self) -> Result<Started, SupervisorError> {
        self.enter(SupervisorPhase::EnsuringTopic)?;
        self.admin.create_topic(&self.settings.topic).await?;

        self.enter(SupervisorPhase::Authenticating)?;
        let token = self.provider.authenticate().await?;

        self.enter(SupervisorPhase::SyncingRules)?;
        let sync = RuleSynchronizer::new(self.provider.rule_store(&token));
        let reset = if self.settings.reset_rules {
            Some(sync.reset_all().await?)
        } else {
            None
        };
        let summary = sync.apply(&self.desired, false).await?;

        self.enter(SupervisorPhase::Streaming)?;
        let source = self.provider.stream_source(&token);
        let events = source.start(&StreamQuery::enriched()).await?;

        Ok(Started {
            sync: summary,
            reset,
            source,
            events,
        })
    }

    async fn abort(&mut self, err: SupervisorError, producer: &Producer) -> SupervisorError {
        let phase = self.phase();
        let _ = self.phases.transition(SupervisorPhase::Failed);
        error!(
            target: "relay.supervisor",
            phase = %phase,
            code = err.code().as_str(),
            error = %err,
            "startup failed"
        );
        producer.close().await;
        err
    }

    fn enter(&mut self, to: SupervisorPhase) -> Result<(), SupervisorError> {
        self.phases
            .transition(to)
            .map_err(|from| SupervisorError::Phase { from, to })?;
        info!(target: "relay.supervisor", phase = %to, "phase");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use relay_provider::RuleStoreError;

    #[test]
    fn settings_follow_config() {
        let mut config = RelayConfig::default();
        config.log.topic = "tweets".into();
        config.log.key_by_event_id = true;
        config.log.queue_capacity = 5;
        config.reset_rules = true;
        config.timeouts.flush_secs = 3;

        let s = SupervisorSettings::from_config(&config);
        assert_eq!(s.topic, "tweets");
        assert_eq!(s.key, KeyStrategy::EventId);
        assert_eq!(s.producer.queue_capacity, 5);
        assert!(s.reset_rules);
        assert_eq!(s.flush_timeout, Duration::from_secs(3));
    }

    #[test]
    fn fixed_key_by_default() {
        let s = SupervisorSettings::from_config(&RelayConfig::default());
        assert_eq!(s.key, KeyStrategy::Fixed("tweet".into()));
    }

    #[test]
    fn invalid_rule_keeps_title_and_value_in_diagnostic() {
        let err = SupervisorError::Rules(RuleSyncError::InvalidRule {
            title: "UnprocessableEntity".into(),
            value: "cat has:nonsense".into(),
        });
        let relay: RelayError = err.into();
        assert_eq!(relay.code, ErrorCode::RulesInvalidRule);
        let shown = relay.to_string();
        assert!(shown.contains("title=UnprocessableEntity"), "{shown}");
        assert!(shown.contains("value=cat has:nonsense"), "{shown}");
    }

    #[test]
    fn classification_delegates() {
        let err = SupervisorError::Rules(RuleSyncError::RemoteUnavailable {
            reason: "down".into(),
            source: Some(RuleStoreError::Unreachable("down".into())),
        });
        assert_eq!(err.code(), ErrorCode::RulesRemoteUnavailable);
        assert_eq!(
            SupervisorError::Stream(StreamError::Disconnected).code(),
            ErrorCode::StreamFailed
        );
        assert!(SupervisorError::Stream(StreamError::Disconnected).is_fatal());
    }
}
