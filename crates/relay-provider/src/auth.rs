// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application-only bearer token exchange (OAuth2 client credentials).

use relay_error::{Classify, ErrorCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Errors from the token exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The HTTP request could not be completed.
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint rejected credentials ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The endpoint issued something other than a bearer token.
    #[error("unexpected token type '{0}'")]
    UnexpectedTokenType(String),
}

impl Classify for AuthError {
    fn code(&self) -> ErrorCode {
        ErrorCode::AuthFailed
    }
}

/// An application-only bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap an access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

/// Exchanges API credentials for a [`BearerToken`].
#[derive(Debug, Clone)]
pub struct TokenClient {
    client: reqwest::Client,
    token_url: String,
    api_key: String,
    api_secret: String,
    timeout: Duration,
}

impl TokenClient {
    /// Create a token client for `token_url`.
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            timeout,
        }
    }

    /// Perform the client-credentials exchange.
    pub async fn fetch(&self) -> Result<BearerToken, AuthError> {
        debug!(target: "relay.stream", url = %self.token_url, "requesting bearer token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::UnexpectedTokenType(token.token_type));
        }
        Ok(BearerToken(token.access_token))
    }
}
