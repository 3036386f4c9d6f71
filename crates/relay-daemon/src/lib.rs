// SPDX-License-Identifier: MIT OR Apache-2.0
//! Supervisor and command implementations behind the `stream-relay` binary.
//!
//! [`Supervisor`] drives one run through its phases and owns the ordered
//! shutdown. [`commands`] holds one function per CLI subcommand.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod components;
pub mod logging;
pub mod phase;
pub mod shutdown;
pub mod supervisor;

pub use components::Components;
pub use phase::{PhaseTransition, SupervisorPhase};
pub use supervisor::{
    DEFAULT_FLUSH_TIMEOUT, RunReport, Supervisor, SupervisorError, SupervisorSettings,
};
