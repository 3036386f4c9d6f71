// SPDX-License-Identifier: MIT OR Apache-2.0
//! Remote rule store: the provider's filter-rule endpoint.

use crate::auth::BearerToken;
use async_trait::async_trait;
use relay_core::{AddRulesRequest, DeleteRulesRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A rule as registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRule {
    /// Provider-assigned identifier.
    pub id: String,
    /// Filter predicate.
    pub value: String,
    /// Label, if one was given.
    #[serde(default)]
    pub tag: Option<String>,
}

/// One entry of a response's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleError {
    /// Error title, e.g. `DuplicateRule`.
    pub title: String,
    /// Rule value the error refers to.
    #[serde(default)]
    pub value: Option<String>,
    /// Rule id the error refers to.
    #[serde(default)]
    pub id: Option<String>,
    /// Free-form detail.
    #[serde(default)]
    pub detail: Option<String>,
    /// Problem type URI.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl RuleError {
    /// Error title the provider uses for a rule that already exists.
    pub const DUPLICATE: &'static str = "DuplicateRule";

    /// Whether this entry reports an already-registered rule.
    pub fn is_duplicate(&self) -> bool {
        self.title == Self::DUPLICATE
    }
}

/// Counters reported by a bulk add.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddSummary {
    /// Rules created.
    pub created: u32,
    /// Rules not created.
    pub not_created: u32,
    /// Rules that passed validation.
    pub valid: u32,
    /// Rules that failed validation.
    pub invalid: u32,
}

/// Counters reported by a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteSummary {
    /// Rules deleted.
    pub deleted: u32,
    /// Rules not deleted.
    pub not_deleted: u32,
}

/// `meta` object of a bulk-add response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddMeta {
    /// Time the request was processed.
    pub sent: Option<String>,
    /// Counters.
    pub summary: AddSummary,
}

/// `meta` object of a bulk-delete response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteMeta {
    /// Time the request was processed.
    pub sent: Option<String>,
    /// Counters.
    pub summary: DeleteSummary,
}

/// Response to a bulk add.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddRulesResponse {
    /// Rules that were created.
    pub data: Vec<RemoteRule>,
    /// Counters.
    pub meta: AddMeta,
    /// Per-rule problems.
    pub errors: Vec<RuleError>,
}

/// Response to a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRulesResponse {
    /// Counters.
    pub meta: DeleteMeta,
    /// Per-rule problems.
    pub errors: Vec<RuleError>,
}

#[derive(Deserialize)]
struct ListRulesResponse {
    #[serde(default)]
    data: Vec<RemoteRule>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Errors talking to a rule store.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    /// The HTTP request could not be completed (includes timeouts).
    #[error("rule request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("rule store returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The store is not reachable.
    #[error("rule store unreachable: {0}")]
    Unreachable(String),
}

/// The remote registry of filter rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Every rule currently registered.
    async fn list(&self) -> Result<Vec<RemoteRule>, RuleStoreError>;

    /// Register rules. With `dry_run` the store validates without persisting.
    async fn add(
        &self,
        body: &AddRulesRequest,
        dry_run: bool,
    ) -> Result<AddRulesResponse, RuleStoreError>;

    /// Delete rules by id.
    async fn delete(&self, body: &DeleteRulesRequest)
    -> Result<DeleteRulesResponse, RuleStoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`RuleStore`] backed by the provider's `/2/tweets/search/stream/rules`.
#[derive(Debug, Clone)]
pub struct HttpRuleStore {
    client: reqwest::Client,
    rules_url: String,
    token: BearerToken,
    timeout: Duration,
}

impl HttpRuleStore {
    /// Create a store rooted at `api_url`.
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        token: BearerToken,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            rules_url: format!(
                "{}/2/tweets/search/stream/rules",
                api_url.trim_end_matches('/')
            ),
            token,
            timeout,
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RuleStoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuleStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RuleStore for HttpRuleStore {
    async fn list(&self) -> Result<Vec<RemoteRule>, RuleStoreError> {
        let response = self
            .client
            .get(&self.rules_url)
            .bearer_auth(self.token.as_str())
            .timeout(self.timeout)
            .send()
            .await?;
        let list: ListRulesResponse = Self::read(response).await?;
        debug!(target: "relay.sync", count = list.data.len(), "listed remote rules");
        Ok(list.data)
    }

    async fn add(
        &self,
        body: &AddRulesRequest,
        dry_run: bool,
    ) -> Result<AddRulesResponse, RuleStoreError> {
        let mut request = self
            .client
            .post(&self.rules_url)
            .bearer_auth(self.token.as_str())
            .json(body)
            .timeout(self.timeout);
        if dry_run {
            request = request.query(&[("dry_run", "true")]);
        }
        Self::read(request.send().await?).await
    }

    async fn delete(
        &self,
        body: &DeleteRulesRequest,
    ) -> Result<DeleteRulesResponse, RuleStoreError> {
        let response = self
            .client
            .post(&self.rules_url)
            .bearer_auth(self.token.as_str())
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;
        Self::read(response).await
    }
}
