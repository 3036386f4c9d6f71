// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for the stream relay.
//!
//! - [`rules`]: the desired filter rules, their wire bodies, and rule-file
//!   parsing.
//! - [`event`]: inbound stream events and the tagged [`Decoded`] result of
//!   payload decoding.
//! - [`record`]: outbound publish requests and delivery reports.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod record;
pub mod rules;

pub use event::{Decoded, StreamEvent, decode_payload};
pub use record::{DeliveryError, DeliveryReport, PublishRequest};
pub use rules::{
    AddRulesRequest, DeleteRulesRequest, Rule, RuleFileError, RuleFormat, RuleSet, RuleSpec,
    load_rules, parse_rules,
};
