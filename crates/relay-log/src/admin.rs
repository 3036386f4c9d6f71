// SPDX-License-Identifier: MIT OR Apache-2.0
//! Topic administration with idempotent create and delete.

use async_trait::async_trait;
use relay_error::{Classify, ErrorCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default ceiling for one admin call.
pub const DEFAULT_ADMIN_DEADLINE: Duration = Duration::from_secs(60);

/// Layout of a topic to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: u32,
    /// Replication factor.
    pub replication_factor: u32,
}

/// Per-topic outcome code of an admin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicErrorCode {
    /// The operation succeeded.
    NoError,
    /// Create was asked for a topic that already exists.
    TopicAlreadyExists,
    /// Delete was asked for a topic that does not exist.
    UnknownTopic,
    /// The credentials may not perform this operation.
    Unauthorized,
    /// The requested layout is invalid for this cluster.
    InvalidConfig,
    /// Any other service error code.
    Other(i32),
}

impl std::fmt::Display for TopicErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => f.write_str("no_error"),
            Self::TopicAlreadyExists => f.write_str("topic_already_exists"),
            Self::UnknownTopic => f.write_str("unknown_topic"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::InvalidConfig => f.write_str("invalid_config"),
            Self::Other(code) => write!(f, "error_{code}"),
        }
    }
}

/// Result for one topic of a batch admin call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicResult {
    /// Topic the result refers to.
    pub topic: String,
    /// Outcome.
    pub code: TopicErrorCode,
    /// Service message, if any.
    pub message: Option<String>,
}

impl TopicResult {
    /// A successful result.
    pub fn ok(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            code: TopicErrorCode::NoError,
            message: None,
        }
    }

    /// A result with the given code.
    pub fn with_code(
        topic: impl Into<String>,
        code: TopicErrorCode,
        message: Option<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            code,
            message,
        }
    }
}

/// Errors from topic administration.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The service refused the operation for this topic.
    #[error("topic '{topic}' admin failed: {code}")]
    Topic {
        /// Topic name.
        topic: String,
        /// Code returned by the service.
        code: TopicErrorCode,
    },

    /// The call did not complete in time.
    #[error("topic '{topic}' admin call timed out after {}s", after.as_secs())]
    Timeout {
        /// Topic name.
        topic: String,
        /// Deadline that expired.
        after: Duration,
    },

    /// The request itself failed.
    #[error("admin request failed: {reason}")]
    Request {
        /// Transport diagnostic.
        reason: String,
    },
}

impl Classify for AdminError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::AdminTimeout,
            Self::Topic { .. } | Self::Request { .. } => ErrorCode::AdminFailed,
        }
    }
}

/// Batch admin operations offered by a log service.
#[async_trait]
pub trait AdminBackend: Send + Sync {
    /// Create topics; one result per spec.
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError>;

    /// Delete topics; one result per name.
    async fn delete_topics(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError>;
}

/// Idempotent single-topic administration over an [`AdminBackend`].
#[derive(Clone)]
pub struct TopicAdmin {
    backend: Arc<dyn AdminBackend>,
    partitions: u32,
    replication_factor: u32,
    deadline: Duration,
}

impl TopicAdmin {
    /// One partition, replication factor three, 60 second deadline.
    pub fn new(backend: Arc<dyn AdminBackend>) -> Self {
        Self {
            backend,
            partitions: 1,
            replication_factor: 3,
            deadline: DEFAULT_ADMIN_DEADLINE,
        }
    }

    /// Layout used for topics this admin creates.
    #[must_use]
    pub fn with_layout(mut self, partitions: u32, replication_factor: u32) -> Self {
        self.partitions = partitions;
        self.replication_factor = replication_factor;
        self
    }

    /// Ceiling for each call.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Ensure `name` exists. An already-existing topic is success.
    pub async fn create_topic(&self, name: &str) -> Result<(), AdminError> {
        let spec = TopicSpec {
            name: name.to_string(),
            partitions: self.partitions,
            replication_factor: self.replication_factor,
        };
        let call = self.backend.create_topics(std::slice::from_ref(&spec), self.deadline);
        let results = self.bounded(name, call).await?;
        match Self::code_for(name, &results)? {
            TopicErrorCode::NoError => {
                info!(
                    target: "relay.admin",
                    topic = %name,
                    partitions = spec.partitions,
                    "topic created"
                );
                Ok(())
            }
            TopicErrorCode::TopicAlreadyExists => {
                info!(target: "relay.admin", topic = %name, "topic already exists");
                Ok(())
            }
            code => {
                warn!(target: "relay.admin", topic = %name, code = %code, "topic creation failed");
                Err(AdminError::Topic {
                    topic: name.to_string(),
                    code,
                })
            }
        }
    }

    /// Delete `name`. A topic that does not exist is success.
    pub async fn delete_topic(&self, name: &str) -> Result<(), AdminError> {
        let names = [name.to_string()];
        let call = self.backend.delete_topics(&names, self.deadline);
        let results = self.bounded(name, call).await?;
        match Self::code_for(name, &results)? {
            TopicErrorCode::NoError => {
                info!(target: "relay.admin", topic = %name, "topic deleted");
                Ok(())
            }
            TopicErrorCode::UnknownTopic => {
                info!(target: "relay.admin", topic = %name, "topic did not exist");
                Ok(())
            }
            code => {
                warn!(target: "relay.admin", topic = %name, code = %code, "topic deletion failed");
                Err(AdminError::Topic {
                    topic: name.to_string(),
                    code,
                })
            }
        }
    }

    async fn bounded<F>(&self, topic: &str, call: F) -> Result<Vec<TopicResult>, AdminError>
    where
        F: std::future::Future<Output = Result<Vec<TopicResult>, AdminError>>,
    {
        tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| AdminError::Timeout {
                topic: topic.to_string(),
                after: self.deadline,
            })?
    }

    fn code_for(name: &str, results: &[TopicResult]) -> Result<TopicErrorCode, AdminError> {
        results
            .iter()
            .find(|r| r.topic == name)
            .map(|r| r.code)
            .ok_or_else(|| AdminError::Request {
                reason: format!("no result returned for topic '{name}'"),
            })
    }
}

impl std::fmt::Debug for TopicAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicAdmin")
            .field("partitions", &self.partitions)
            .field("replication_factor", &self.replication_factor)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
