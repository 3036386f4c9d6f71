// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wiring of the concrete collaborators from a validated configuration.

use relay_config::RelayConfig;
use relay_error::{ErrorCode, RelayError};
use relay_log::{RecordTransport, RestAdmin, RestSettings, RestTransport, TopicAdmin};
use relay_provider::{ProviderEndpoints, StreamProvider, TwitterProvider};
use std::sync::Arc;

/// The external systems the supervisor talks to.
#[derive(Clone)]
pub struct Components {
    /// Topic administration for the destination log.
    pub admin: TopicAdmin,
    /// The stream provider.
    pub provider: Arc<dyn StreamProvider>,
    /// Record delivery into the log.
    pub transport: Arc<dyn RecordTransport>,
}

impl Components {
    /// REST log client and HTTP stream provider built from `config`.
    ///
    /// # Errors
    ///
    /// Fails if an HTTP client cannot be constructed.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let rest = rest_settings(config);
        let admin = RestAdmin::new(rest.clone()).map_err(client_error)?;
        let transport = RestTransport::new(rest).map_err(client_error)?;
        let provider = TwitterProvider::new(provider_endpoints(config)).map_err(|e| {
            RelayError::new(ErrorCode::Internal, "cannot build provider client").with_source(e)
        })?;

        Ok(Self {
            admin: TopicAdmin::new(Arc::new(admin))
                .with_layout(config.log.partitions, config.log.replication_factor)
                .with_deadline(config.timeouts.admin()),
            provider: Arc::new(provider),
            transport: Arc::new(transport),
        })
    }
}

fn rest_settings(config: &RelayConfig) -> RestSettings {
    RestSettings {
        base_url: config.log.bootstrap_url.clone(),
        cluster_id: config.log.cluster_id.clone(),
        api_key: config.log.api_key.expose().to_string(),
        api_secret: config.log.api_secret.expose().to_string(),
        timeout: config.timeouts.admin(),
    }
}

fn provider_endpoints(config: &RelayConfig) -> ProviderEndpoints {
    ProviderEndpoints {
        token_url: config.provider.token_url.clone(),
        api_url: config.provider.api_url.clone(),
        api_key: config.provider.api_key.expose().to_string(),
        api_secret: config.provider.api_secret.expose().to_string(),
        request_timeout: config.timeouts.admin(),
    }
}

fn client_error(err: reqwest::Error) -> RelayError {
    RelayError::new(ErrorCode::Internal, "cannot build log client").with_source(err)
}
