// SPDX-License-Identifier: MIT OR Apache-2.0
//! Log service access over its REST v3 API.

use crate::admin::{AdminBackend, AdminError, TopicErrorCode, TopicResult, TopicSpec};
use crate::producer::{RecordPosition, RecordTransport};
use async_trait::async_trait;
use relay_core::{DeliveryError, PublishRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Error code for "topic already exists".
pub const CODE_TOPIC_EXISTS: i32 = 40002;
/// Error code for "unknown topic".
pub const CODE_UNKNOWN_TOPIC: i32 = 40403;

/// Connection settings for the REST API.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Base URL; `/v3/...` paths are appended to it.
    pub base_url: String,
    /// Cluster id used in every path.
    pub cluster_id: String,
    /// Basic-auth user.
    pub api_key: String,
    /// Basic-auth password.
    pub api_secret: String,
    /// Per-request deadline.
    pub timeout: Duration,
}

/// Shared HTTP plumbing for [`RestTransport`] and [`RestAdmin`].
#[derive(Debug, Clone)]
struct RestEndpoint {
    client: reqwest::Client,
    settings: RestSettings,
}

impl RestEndpoint {
    fn new(settings: RestSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stream-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn topics_url(&self) -> String {
        format!(
            "{}/v3/clusters/{}/topics",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.cluster_id
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.settings.api_key, Some(&self.settings.api_secret))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i32,
    #[serde(default)]
    message: Option<String>,
}

async fn error_body(response: reqwest::Response) -> (u16, ErrorBody) {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
        error_code: i32::from(status),
        message: Some(text),
    });
    (status, body)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ProduceBody<'a> {
    key: Payload<'a>,
    value: Payload<'a>,
}

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a str,
}

#[derive(Deserialize)]
struct ProduceResponse {
    error_code: i32,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    partition_id: i32,
    #[serde(default)]
    offset: i64,
}

/// [`RecordTransport`] posting to `/v3/clusters/{cluster}/topics/{topic}/records`.
#[derive(Debug, Clone)]
pub struct RestTransport {
    endpoint: RestEndpoint,
}

impl RestTransport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(settings: RestSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: RestEndpoint::new(settings)?,
        })
    }
}

#[async_trait]
impl RecordTransport for RestTransport {
    async fn send(&self, record: &PublishRequest) -> Result<RecordPosition, DeliveryError> {
        let url = format!("{}/{}/records", self.endpoint.topics_url(), record.topic);
        let body = ProduceBody {
            key: Payload {
                kind: "STRING",
                data: &record.key,
            },
            value: Payload {
                kind: "STRING",
                data: &record.value,
            },
        };
        let response = self
            .endpoint
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::new(None, e.to_string()))?;

        if !response.status().is_success() {
            let (status, err) = error_body(response).await;
            return Err(DeliveryError::new(
                Some(err.error_code),
                err.message.unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }

        let produced: ProduceResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::new(None, e.to_string()))?;
        if produced.error_code >= 400 {
            return Err(DeliveryError::new(
                Some(produced.error_code),
                produced.message.unwrap_or_default(),
            ));
        }
        Ok(RecordPosition {
            partition: produced.partition_id,
            offset: produced.offset,
        })
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CreateTopicBody<'a> {
    topic_name: &'a str,
    partitions_count: u32,
    replication_factor: u32,
}

/// [`AdminBackend`] over `/v3/clusters/{cluster}/topics`.
#[derive(Debug, Clone)]
pub struct RestAdmin {
    endpoint: RestEndpoint,
}

impl RestAdmin {
    /// Create an admin client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(settings: RestSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: RestEndpoint::new(settings)?,
        })
    }

    fn code_for(error_code: i32) -> TopicErrorCode {
        match error_code {
            CODE_TOPIC_EXISTS => TopicErrorCode::TopicAlreadyExists,
            CODE_UNKNOWN_TOPIC => TopicErrorCode::UnknownTopic,
            401 | 403 | 40101 | 40301 => TopicErrorCode::Unauthorized,
            40001 | 40003 => TopicErrorCode::InvalidConfig,
            other => TopicErrorCode::Other(other),
        }
    }

    async fn result_of(topic: &str, response: reqwest::Response) -> TopicResult {
        if response.status().is_success() {
            return TopicResult::ok(topic);
        }
        let (_, err) = error_body(response).await;
        TopicResult::with_code(topic, Self::code_for(err.error_code), err.message)
    }
}

#[async_trait]
impl AdminBackend for RestAdmin {
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError> {
        let url = self.endpoint.topics_url();
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            debug!(target: "relay.admin", topic = %spec.name, "creating topic");
            let response = self
                .endpoint
                .request(reqwest::Method::POST, &url)
                .json(&CreateTopicBody {
                    topic_name: &spec.name,
                    partitions_count: spec.partitions,
                    replication_factor: spec.replication_factor,
                })
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| AdminError::Request {
                    reason: e.to_string(),
                })?;
            results.push(Self::result_of(&spec.name, response).await);
        }
        Ok(results)
    }

    async fn delete_topics(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            debug!(target: "relay.admin", topic = %name, "deleting topic");
            let url = format!("{}/{}", self.endpoint.topics_url(), name);
            let response = self
                .endpoint
                .request(reqwest::Method::DELETE, &url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| AdminError::Request {
                    reason: e.to_string(),
                })?;
            results.push(Self::result_of(name, response).await);
        }
        Ok(results)
    }
}
