// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outbound log records and their delivery reports.

use relay_error::{Classify, ErrorCode};
use serde::{Deserialize, Serialize};

/// A record handed to the log producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Destination topic.
    pub topic: String,
    /// Partitioning key.
    pub key: String,
    /// Record payload.
    pub value: String,
}

impl PublishRequest {
    /// Create a publish request.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Why a single record was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    /// Service-specific error code, when one was returned.
    pub code: Option<i32>,
    /// Human-readable description.
    pub message: String,
}

impl DeliveryError {
    /// Create a delivery error.
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "delivery failed ({code}): {}", self.message),
            None => write!(f, "delivery failed: {}", self.message),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl Classify for DeliveryError {
    fn code(&self) -> ErrorCode {
        ErrorCode::DeliveryFailed
    }
}

/// Asynchronous outcome of one publish attempt.
///
/// Reports carry no link back to the event that produced the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Topic the record was sent to.
    pub topic: String,
    /// Partition the record landed in.
    pub partition: Option<i32>,
    /// Offset assigned by the log.
    pub offset: Option<i64>,
    /// Failure, if the record was not delivered.
    pub error: Option<DeliveryError>,
}

impl DeliveryReport {
    /// A successful delivery.
    pub fn delivered(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition),
            offset: Some(offset),
            error: None,
        }
    }

    /// A failed delivery.
    pub fn failed(topic: impl Into<String>, error: DeliveryError) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
            error: Some(error),
        }
    }

    /// Whether the record reached the log.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_display() {
        assert_eq!(
            DeliveryError::new(Some(40403), "topic not found").to_string(),
            "delivery failed (40403): topic not found"
        );
        assert_eq!(
            DeliveryError::new(None, "connection reset").to_string(),
            "delivery failed: connection reset"
        );
    }

    #[test]
    fn report_constructors() {
        let ok = DeliveryReport::delivered("tweets", 0, 17);
        assert!(ok.is_success());
        assert_eq!(ok.offset, Some(17));

        let bad = DeliveryReport::failed("tweets", DeliveryError::new(None, "boom"));
        assert!(!bad.is_success());
        assert_eq!(bad.partition, None);
    }
}
