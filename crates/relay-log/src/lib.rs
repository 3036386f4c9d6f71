// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the partitioned log the relay publishes into.
//!
//! [`TopicAdmin`] makes topic creation and deletion idempotent and bounded.
//! [`Producer`] accepts records without blocking and reports their fate on
//! a separate [`DeliveryReports`] channel. Both sit on small traits
//! ([`AdminBackend`], [`RecordTransport`]) with a REST implementation and an
//! in-memory one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod memory;
pub mod producer;
pub mod rest;

pub use admin::{
    AdminBackend, AdminError, DEFAULT_ADMIN_DEADLINE, TopicAdmin, TopicErrorCode, TopicResult,
    TopicSpec,
};
pub use memory::{MemoryTransport, StoredRecord};
pub use producer::{
    DeliveryReports, Producer, ProducerSettings, PublishError, Publisher, RecordPosition,
    RecordTransport,
};
pub use rest::{RestAdmin, RestSettings, RestTransport};
