// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline lifecycle: `Idle -> Running -> Stopping -> Stopped`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`RelayPipeline`](crate::RelayPipeline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Constructed, not started.
    Idle,
    /// Forward and drain tasks are running.
    Running,
    /// The source was told to stop; waiting for the report channel to close.
    Stopping,
    /// Both tasks have finished.
    Stopped,
    /// A task ended abnormally.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of a single state transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineTransition {
    /// State before the transition.
    pub from: PipelineState,
    /// State after the transition.
    pub to: PipelineState,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// Enforces the allowed transitions and keeps their history.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: PipelineState,
    history: Vec<PipelineTransition>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            history: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn history(&self) -> &[PipelineTransition] {
        &self.history
    }

    pub(crate) fn can_transition(&self, to: PipelineState) -> bool {
        if to == PipelineState::Failed {
            return self.state != PipelineState::Failed;
        }
        matches!(
            (self.state, to),
            (PipelineState::Idle, PipelineState::Running)
                | (PipelineState::Running, PipelineState::Stopping)
                | (PipelineState::Stopping, PipelineState::Stopped)
        )
    }

    /// Move to `to`, or report the current state if that is not allowed.
    pub(crate) fn transition(&mut self, to: PipelineState) -> Result<(), PipelineState> {
        if !self.can_transition(to) {
            return Err(self.state);
        }
        self.history.push(PipelineTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }
}
