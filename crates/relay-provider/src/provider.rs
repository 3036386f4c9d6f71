// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider facade: one object that authenticates and hands out the
//! token-bound rule store and stream source.

use crate::auth::{AuthError, BearerToken, TokenClient};
use crate::store::{HttpRuleStore, RuleStore};
use crate::stream::{HttpStreamSource, StreamSource};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for everything the relay needs from the stream provider.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Exchange credentials for a bearer token.
    async fn authenticate(&self) -> Result<BearerToken, AuthError>;

    /// Rule store authorized by `token`.
    fn rule_store(&self, token: &BearerToken) -> Arc<dyn RuleStore>;

    /// A fresh, unstarted stream source authorized by `token`.
    fn stream_source(&self, token: &BearerToken) -> Arc<dyn StreamSource>;
}

/// Connection settings for [`TwitterProvider`].
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// OAuth2 token endpoint.
    pub token_url: String,
    /// API base URL.
    pub api_url: String,
    /// Client-credentials key.
    pub api_key: String,
    /// Client-credentials secret.
    pub api_secret: String,
    /// Deadline for token and rule calls. The stream itself is unbounded.
    pub request_timeout: Duration,
}

/// [`StreamProvider`] for the v2 filtered-stream API.
#[derive(Debug, Clone)]
pub struct TwitterProvider {
    client: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl TwitterProvider {
    /// Build a provider with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stream-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(endpoints.request_timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }

    /// The endpoints this provider talks to.
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl StreamProvider for TwitterProvider {
    async fn authenticate(&self) -> Result<BearerToken, AuthError> {
        TokenClient::new(
            self.client.clone(),
            &self.endpoints.token_url,
            &self.endpoints.api_key,
            &self.endpoints.api_secret,
            self.endpoints.request_timeout,
        )
        .fetch()
        .await
    }

    fn rule_store(&self, token: &BearerToken) -> Arc<dyn RuleStore> {
        Arc::new(HttpRuleStore::new(
            self.client.clone(),
            &self.endpoints.api_url,
            token.clone(),
            self.endpoints.request_timeout,
        ))
    }

    fn stream_source(&self, token: &BearerToken) -> Arc<dyn StreamSource> {
        Arc::new(HttpStreamSource::new(
            self.client.clone(),
            &self.endpoints.api_url,
            token.clone(),
        ))
    }
}
