// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the filtered real-time stream provider.
//!
//! - [`auth`]: client-credentials exchange for a bearer token.
//! - [`store`]: the remote rule registry behind the [`RuleStore`] trait.
//! - [`sync`]: [`RuleSynchronizer`], the reset-then-add reconciliation.
//! - [`stream`]: the [`StreamSource`] trait and its HTTP implementation.
//! - [`provider`]: [`StreamProvider`], which ties the above to one token.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod memory;
pub mod provider;
pub mod stop;
pub mod store;
pub mod stream;
pub mod sync;

pub use auth::{AuthError, BearerToken, TokenClient};
pub use memory::MemoryRuleStore;
pub use provider::{ProviderEndpoints, StreamProvider, TwitterProvider};
pub use stop::StopHandle;
pub use store::{
    AddRulesResponse, DeleteRulesResponse, HttpRuleStore, RemoteRule, RuleError, RuleStore,
    RuleStoreError,
};
pub use stream::{
    EventSender, EventStream, HttpStreamSource, MAX_LINE_BYTES, StreamError, StreamQuery,
    StreamSource,
};
pub use sync::{ResetSummary, RuleSyncError, RuleSynchronizer, SyncSummary};
