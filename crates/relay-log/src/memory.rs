// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory partitioned log implementing both [`RecordTransport`] and
//! [`AdminBackend`].

use crate::admin::{AdminBackend, AdminError, TopicErrorCode, TopicResult, TopicSpec};
use crate::producer::{RecordPosition, RecordTransport};
use async_trait::async_trait;
use relay_core::{DeliveryError, PublishRequest};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A record held by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Partition the record was appended to.
    pub partition: i32,
    /// Offset within that partition.
    pub offset: i64,
    /// Record key.
    pub key: String,
    /// Record value.
    pub value: String,
}

#[derive(Debug, Default)]
struct Topic {
    next_offsets: Vec<i64>,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    fail_deliveries: bool,
    delivery_delay: Duration,
    admin_failure: Option<TopicErrorCode>,
    admin_delay: Duration,
}

/// Partitioned append-only log kept in memory.
///
/// Records are routed to a partition by key hash. Publishing to a topic that
/// was never created fails delivery with code 40403.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` partitions unless it exists.
    pub fn ensure_topic(&self, topic: &str, partitions: u32) {
        self.lock()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic {
                next_offsets: vec![0; partitions.max(1) as usize],
                records: Vec::new(),
            });
    }

    /// Partition count of `topic`, if it exists.
    pub fn partitions(&self, topic: &str) -> Option<u32> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.next_offsets.len() as u32)
    }

    /// Records of `topic` in append order.
    pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    /// Values of `topic` in append order.
    pub fn values(&self, topic: &str) -> Vec<String> {
        self.records(topic).into_iter().map(|r| r.value).collect()
    }

    /// Make every delivery fail while set.
    pub fn fail_deliveries(&self, fail: bool) {
        self.lock().fail_deliveries = fail;
    }

    /// Delay every delivery by `delay`.
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.lock().delivery_delay = delay;
    }

    /// Make every admin call report `code` for each topic.
    pub fn fail_admin_with(&self, code: TopicErrorCode) {
        self.lock().admin_failure = Some(code);
    }

    /// Delay every admin call by `delay`.
    pub fn set_admin_delay(&self, delay: Duration) {
        self.lock().admin_delay = delay;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn partition_for(key: &str, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions as u64) as usize
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RecordTransport for MemoryTransport {
    async fn send(&self, record: &PublishRequest) -> Result<RecordPosition, DeliveryError> {
        let delay = self.lock().delivery_delay;
        Self::pause(delay).await;

        let mut state = self.lock();
        if state.fail_deliveries {
            return Err(DeliveryError::new(Some(50003), "broker not available"));
        }
        let topic = state
            .topics
            .get_mut(&record.topic)
            .ok_or_else(|| {
                DeliveryError::new(Some(40403), format!("unknown topic '{}'", record.topic))
            })?;

        let partition = Self::partition_for(&record.key, topic.next_offsets.len());
        let offset = topic.next_offsets[partition];
        topic.next_offsets[partition] += 1;
        topic.records.push(StoredRecord {
            partition: partition as i32,
            offset,
            key: record.key.clone(),
            value: record.value.clone(),
        });
        Ok(RecordPosition {
            partition: partition as i32,
            offset,
        })
    }
}

#[async_trait]
impl AdminBackend for MemoryTransport {
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
        _timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError> {
        let delay = self.lock().admin_delay;
        Self::pause(delay).await;

        let mut state = self.lock();
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(code) = state.admin_failure {
                results.push(TopicResult::with_code(&spec.name, code, None));
            } else if state.topics.contains_key(&spec.name) {
                results.push(TopicResult::with_code(
                    &spec.name,
                    TopicErrorCode::TopicAlreadyExists,
                    Some(format!("Topic '{}' already exists.", spec.name)),
                ));
            } else {
                state.topics.insert(
                    spec.name.clone(),
                    Topic {
                        next_offsets: vec![0; spec.partitions.max(1) as usize],
                        records: Vec::new(),
                    },
                );
                results.push(TopicResult::ok(&spec.name));
            }
        }
        Ok(results)
    }

    async fn delete_topics(
        &self,
        names: &[String],
        _timeout: Duration,
    ) -> Result<Vec<TopicResult>, AdminError> {
        let delay = self.lock().admin_delay;
        Self::pause(delay).await;

        let mut state = self.lock();
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            if let Some(code) = state.admin_failure {
                results.push(TopicResult::with_code(name, code, None));
            } else if state.topics.remove(name).is_some() {
                results.push(TopicResult::ok(name));
            } else {
                results.push(TopicResult::with_code(name, TopicErrorCode::UnknownTopic, None));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_lands_in_same_partition_with_increasing_offsets() {
        let log = MemoryTransport::new();
        log.ensure_topic("t", 4);
        let a = log.send(&PublishRequest::new("t", "k", "1")).await.unwrap();
        let b = log.send(&PublishRequest::new("t", "k", "2")).await.unwrap();
        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
    }

    #[tokio::test]
    async fn unknown_topic_fails_delivery() {
        let log = MemoryTransport::new();
        let err = log.send(&PublishRequest::new("nope", "k", "v")).await.unwrap_err();
        assert_eq!(err.code, Some(40403));
    }
}
