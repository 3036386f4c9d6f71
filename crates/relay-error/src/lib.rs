// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy with stable error codes for the stream relay.
//!
//! Every component keeps its own `thiserror` enum for precise matching.
//! When a failure leaves the component that produced it, it is classified
//! into an [`ErrorCode`], which decides whether the process must stop
//! ([`ErrorCode::is_fatal`]) and which exit code the binary reports.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and rule-file errors.
    Config,
    /// Topic administration errors.
    Admin,
    /// Credential exchange errors.
    Auth,
    /// Rule synchronization errors.
    RuleSync,
    /// Inbound stream errors.
    Stream,
    /// Outbound log errors.
    Log,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Admin => "admin",
            Self::Auth => "auth",
            Self::RuleSync => "rule_sync",
            Self::Stream => "stream",
            Self::Log => "log",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Config --
    /// Configuration is missing or invalid.
    ConfigInvalid,
    /// The rule file is missing, malformed, or contains an empty rule.
    RuleFileInvalid,

    // -- Admin --
    /// Topic create/delete was rejected by the log service.
    AdminFailed,
    /// Topic create/delete exceeded its deadline.
    AdminTimeout,

    // -- Auth --
    /// Bearer token exchange failed.
    AuthFailed,

    // -- RuleSync --
    /// The rule store could not be listed, added to, or deleted from.
    RulesRemoteUnavailable,
    /// The rule store rejected a rule for a reason other than duplication.
    RulesInvalidRule,
    /// The rule store already holds an identical rule.
    RulesDuplicate,

    // -- Stream --
    /// The inbound stream failed or disconnected.
    StreamFailed,
    /// A single stream payload could not be decoded.
    DecodeFailed,

    // -- Log --
    /// A publish call was rejected synchronously.
    PublishRejected,
    /// A record was not delivered to the log.
    DeliveryFailed,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid | Self::RuleFileInvalid => ErrorCategory::Config,
            Self::AdminFailed | Self::AdminTimeout => ErrorCategory::Admin,
            Self::AuthFailed => ErrorCategory::Auth,
            Self::RulesRemoteUnavailable | Self::RulesInvalidRule | Self::RulesDuplicate => {
                ErrorCategory::RuleSync
            }
            Self::StreamFailed | Self::DecodeFailed => ErrorCategory::Stream,
            Self::PublishRejected | Self::DeliveryFailed => ErrorCategory::Log,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Whether an error with this code must terminate the process.
    ///
    /// Recoverable codes are contained by the component that observes them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::RulesDuplicate | Self::DecodeFailed | Self::PublishRejected | Self::DeliveryFailed
        )
    }

    /// Process exit code used when this error terminates the binary.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Config => 2,
            _ => 1,
        }
    }

    /// Stable `&'static str` representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::RuleFileInvalid => "RULE_FILE_INVALID",
            Self::AdminFailed => "ADMIN_FAILED",
            Self::AdminTimeout => "ADMIN_TIMEOUT",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RulesRemoteUnavailable => "RULES_REMOTE_UNAVAILABLE",
            Self::RulesInvalidRule => "RULES_INVALID_RULE",
            Self::RulesDuplicate => "RULES_DUPLICATE",
            Self::StreamFailed => "STREAM_FAILED",
            Self::DecodeFailed => "DECODE_FAILED",
            Self::PublishRejected => "PUBLISH_REJECTED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RelayError
// ---------------------------------------------------------------------------

/// Classified relay error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and structured context.
///
/// ```
/// use relay_error::{ErrorCode, RelayError};
///
/// let err = RelayError::new(ErrorCode::RulesInvalidRule, "rule rejected")
///     .with_context("title", "UnprocessableEntity")
///     .with_context("value", "cat has:nonsense");
/// assert!(err.code.is_fatal());
/// ```
pub struct RelayError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RelayError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// Values that fail to serialize are skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RelayError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
                .collect();
            write!(f, " ({})", pairs.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Conversion into the shared taxonomy, implemented by each component's
/// error type.
pub trait Classify {
    /// The stable code describing this error.
    fn code(&self) -> ErrorCode;

    /// Whether this error must terminate the process.
    fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
