// SPDX-License-Identifier: MIT OR Apache-2.0
//! Supervisor phases and their allowed order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the supervisor is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// Not yet started.
    Created,
    /// Making sure the destination topic exists.
    EnsuringTopic,
    /// Obtaining a bearer token.
    Authenticating,
    /// Reconciling the remote rule set.
    SyncingRules,
    /// Opening the stream and starting the pipeline.
    Streaming,
    /// Relaying until a signal or a stream error.
    AwaitingTermination,
    /// Stopping the source, flushing and closing the producer.
    ShuttingDown,
    /// Finished.
    Terminated,
    /// A startup phase failed.
    Failed,
}

impl SupervisorPhase {
    /// The phase that follows this one on the normal path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::EnsuringTopic),
            Self::EnsuringTopic => Some(Self::Authenticating),
            Self::Authenticating => Some(Self::SyncingRules),
            Self::SyncingRules => Some(Self::Streaming),
            Self::Streaming => Some(Self::AwaitingTermination),
            Self::AwaitingTermination => Some(Self::ShuttingDown),
            Self::ShuttingDown => Some(Self::Terminated),
            Self::Terminated | Self::Failed => None,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::EnsuringTopic => "ensuring_topic",
            Self::Authenticating => "authenticating",
            Self::SyncingRules => "syncing_rules",
            Self::Streaming => "streaming",
            Self::AwaitingTermination => "awaiting_termination",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of one phase change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase left.
    pub from: SupervisorPhase,
    /// Phase entered.
    pub to: SupervisorPhase,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Tracks the current phase and its history.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: SupervisorPhase,
    history: Vec<PhaseTransition>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            phase: SupervisorPhase::Created,
            history: Vec::new(),
        }
    }

    pub(crate) fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    pub(crate) fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub(crate) fn can_transition(&self, to: SupervisorPhase) -> bool {
        if to == SupervisorPhase::Failed {
            return !self.phase.is_final();
        }
        self.phase.next() == Some(to)
    }

    pub(crate) fn transition(&mut self, to: SupervisorPhase) -> Result<(), SupervisorPhase> {
        if !self.can_transition(to) {
            return Err(self.phase);
        }
        self.history.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_normal_path() {
        let mut t = PhaseTracker::new();
        let mut phase = SupervisorPhase::Created;
        while let Some(next) = phase.next() {
            t.transition(next).unwrap();
            phase = next;
        }
        assert_eq!(t.phase(), SupervisorPhase::Terminated);
        assert_eq!(t.history().len(), 7);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut t = PhaseTracker::new();
        t.transition(SupervisorPhase::EnsuringTopic).unwrap();
        assert_eq!(
            t.transition(SupervisorPhase::Streaming),
            Err(SupervisorPhase::EnsuringTopic)
        );
    }

    #[test]
    fn failed_is_reachable_until_final() {
        let mut t = PhaseTracker::new();
        t.transition(SupervisorPhase::EnsuringTopic).unwrap();
        t.transition(SupervisorPhase::Failed).unwrap();
        assert!(t.transition(SupervisorPhase::Failed).is_err());
        assert!(t.transition(SupervisorPhase::Authenticating).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(SupervisorPhase::AwaitingTermination.to_string(), "awaiting_termination");
    }
}
