// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound stream events and payload decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;

/// A matched post delivered by the stream provider.
///
/// Read-only to the relay; it lives until it is forwarded or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Provider-assigned post identifier.
    pub id: String,
    /// Post body.
    pub text: String,
    /// Creation time, when the `created_at` enrichment was delivered.
    pub created_at: Option<DateTime<Utc>>,
    /// Author identifier, when the `author_id` expansion was delivered.
    pub author_id: Option<String>,
    /// Ids of the rules that matched this post.
    pub matching_rule_ids: BTreeSet<String>,
}

/// Result of decoding one stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed event.
    Event(StreamEvent),
    /// A payload that could not be decoded. The raw bytes are kept for
    /// diagnostics.
    Malformed {
        /// Payload as received.
        raw: Vec<u8>,
        /// Decoder diagnostic.
        reason: String,
    },
}

impl Decoded {
    /// Returns the event, if this payload decoded into one.
    pub fn event(&self) -> Option<&StreamEvent> {
        match self {
            Self::Event(ev) => Some(ev),
            Self::Malformed { .. } => None,
        }
    }
}

#[derive(Deserialize)]
struct Payload {
    data: PayloadData,
    #[serde(default)]
    matching_rules: Vec<MatchingRule>,
}

#[derive(Deserialize)]
struct PayloadData {
    id: String,
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author_id: Option<String>,
}

#[derive(Deserialize)]
struct MatchingRule {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

// Older stream payloads carry numeric rule ids.
fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number rule id, got {other}"
        ))),
    }
}

/// Decode one stream payload.
///
/// Never fails: anything that is not a post with an `id` and `text` comes
/// back as [`Decoded::Malformed`].
pub fn decode_payload(bytes: &[u8]) -> Decoded {
    match serde_json::from_slice::<Payload>(bytes) {
        Ok(payload) => Decoded::Event(StreamEvent {
            id: payload.data.id,
            text: payload.data.text,
            created_at: payload.data.created_at,
            author_id: payload.data.author_id,
            matching_rule_ids: payload.matching_rules.into_iter().map(|r| r.id).collect(),
        }),
        Err(e) => Decoded::Malformed {
            raw: bytes.to_vec(),
            reason: e.to_string(),
        },
    }
}
