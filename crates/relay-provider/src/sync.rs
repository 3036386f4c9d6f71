// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reconciles a desired [`RuleSet`] against a [`RuleStore`].
//!
//! The protocol is reset-then-recreate: [`RuleSynchronizer::reset_all`]
//! removes every remote rule, and [`RuleSynchronizer::apply`] bulk-adds the
//! desired ones. Duplicates reported by the store are skipped; any other
//! per-rule error fails the whole call. There are no internal retries.

use crate::store::{RemoteRule, RuleStore, RuleStoreError};
use relay_core::{DeleteRulesRequest, RuleSet};
use relay_error::{Classify, ErrorCode};
use std::sync::Arc;
use tracing::{info, warn};

/// Errors from rule synchronization.
#[derive(Debug, thiserror::Error)]
pub enum RuleSyncError {
    /// The store could not be reached, or it refused a bulk call.
    #[error("rule store unavailable: {reason}")]
    RemoteUnavailable {
        /// What went wrong.
        reason: String,
        /// Underlying store error, if any.
        #[source]
        source: Option<RuleStoreError>,
    },

    /// The store rejected a rule for a reason other than duplication.
    #[error("rule rejected ({title}): {value}")]
    InvalidRule {
        /// Error title reported by the store.
        title: String,
        /// The offending rule value, if the store named it.
        value: String,
    },

    /// A rule already existed remotely. Contained inside [`RuleSynchronizer::apply`].
    #[error("rule already exists: {value}")]
    Duplicate {
        /// The duplicated rule value.
        value: String,
    },
}

impl RuleSyncError {
    fn unavailable(reason: impl Into<String>, source: RuleStoreError) -> Self {
        Self::RemoteUnavailable {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

impl Classify for RuleSyncError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::RemoteUnavailable { .. } => ErrorCode::RulesRemoteUnavailable,
            Self::InvalidRule { .. } => ErrorCode::RulesInvalidRule,
            Self::Duplicate { .. } => ErrorCode::RulesDuplicate,
        }
    }
}

/// Outcome of [`RuleSynchronizer::reset_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetSummary {
    /// Ids that were sent for deletion.
    pub deleted_ids: Vec<String>,
    /// Deleted count reported by the store.
    pub deleted: u32,
}

/// Outcome of [`RuleSynchronizer::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Created count reported by the store.
    pub created: u32,
    /// Values of rules skipped because they already existed.
    pub skipped: Vec<String>,
    /// Whether the add was a dry run.
    pub dry_run: bool,
}

/// Drives rule reconciliation against one store.
#[derive(Clone)]
pub struct RuleSynchronizer {
    store: Arc<dyn RuleStore>,
}

impl RuleSynchronizer {
    /// Create a synchronizer for `store`.
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Every rule currently registered remotely.
    pub async fn list(&self) -> Result<Vec<RemoteRule>, RuleSyncError> {
        self.store
            .list()
            .await
            .map_err(|e| RuleSyncError::unavailable("listing rules failed", e))
    }

    /// Delete every remote rule.
    ///
    /// An empty remote set succeeds without a delete call.
    pub async fn reset_all(&self) -> Result<ResetSummary, RuleSyncError> {
        let existing = self.list().await?;
        if existing.is_empty() {
            info!(target: "relay.sync", "no remote rules to delete");
            return Ok(ResetSummary::default());
        }

        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        let body = DeleteRulesRequest::new(ids.clone());
        let response = self
            .store
            .delete(&body)
            .await
            .map_err(|e| RuleSyncError::unavailable("deleting rules failed", e))?;

        if let Some(first) = response.errors.first() {
            return Err(RuleSyncError::RemoteUnavailable {
                reason: format!(
                    "store reported {} delete error(s), first: {}",
                    response.errors.len(),
                    first.title
                ),
                source: None,
            });
        }

        info!(
            target: "relay.sync",
            requested = ids.len(),
            deleted = response.meta.summary.deleted,
            "deleted remote rules"
        );
        Ok(ResetSummary {
            deleted_ids: ids,
            deleted: response.meta.summary.deleted,
        })
    }

    /// Bulk-add `desired`, passing `dry_run` through to the store.
    ///
    /// Duplicate entries are logged and collected in
    /// [`SyncSummary::skipped`]. The first non-duplicate entry fails the call
    /// with [`RuleSyncError::InvalidRule`].
    pub async fn apply(
        &self,
        desired: &RuleSet,
        dry_run: bool,
    ) -> Result<SyncSummary, RuleSyncError> {
        let body = desired.add_request();
        let response = self
            .store
            .add(&body, dry_run)
            .await
            .map_err(|e| RuleSyncError::unavailable("adding rules failed", e))?;

        let mut skipped = Vec::new();
        let mut rejected = None;
        for error in &response.errors {
            let value = error.value.clone().unwrap_or_default();
            if error.is_duplicate() {
                warn!(
                    target: "relay.sync",
                    code = ErrorCode::RulesDuplicate.as_str(),
                    value = %value,
                    "rule already exists, skipping"
                );
                skipped.push(value);
            } else if rejected.is_none() {
                rejected = Some(RuleSyncError::InvalidRule {
                    title: error.title.clone(),
                    value,
                });
            }
        }
        if let Some(err) = rejected {
            return Err(err);
        }

        let summary = SyncSummary {
            created: response.meta.summary.created,
            skipped,
            dry_run,
        };
        info!(
            target: "relay.sync",
            created = summary.created,
            skipped = summary.skipped.len(),
            dry_run,
            "applied rules"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for RuleSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSynchronizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRuleStore;
    use relay_core::Rule;

    fn desired(values: &[(&str, &str)]) -> RuleSet {
        values.iter().map(|(t, v)| Rule::new(*t, *v)).collect()
    }

    #[tokio::test]
    async fn reset_on_empty_store_makes_no_delete_call() {
        let store = Arc::new(MemoryRuleStore::new());
        let sync = RuleSynchronizer::new(store.clone());
        let summary = sync.reset_all().await.unwrap();
        assert!(summary.deleted_ids.is_empty());
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn reset_then_apply_leaves_exactly_desired() {
        let store = Arc::new(MemoryRuleStore::with_rules([("stale", "dog")]));
        let stale_id = store.rules()[0].id.clone();
        let sync = RuleSynchronizer::new(store.clone());

        let reset = sync.reset_all().await.unwrap();
        assert_eq!(reset.deleted_ids, vec![stale_id]);

        let summary = sync
            .apply(&desired(&[("t1", "cat has:images")]), false)
            .await
            .unwrap();
        assert_eq!(summary.created, 1);

        let remote = store.rules();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].value, "cat has:images");
        assert_eq!(remote[0].tag.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn duplicates_only_is_success() {
        let store = Arc::new(MemoryRuleStore::with_rules([("a", "rust"), ("b", "tokio")]));
        let sync = RuleSynchronizer::new(store.clone());
        let summary = sync
            .apply(&desired(&[("a", "rust"), ("b", "tokio"), ("c", "serde")]), false)
            .await
            .unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped.len(), 2);
        assert_eq!(summary.skipped, vec!["rust".to_string(), "tokio".to_string()]);
    }

    #[tokio::test]
    async fn non_duplicate_error_fails_with_title_and_value() {
        let store = Arc::new(MemoryRuleStore::new());
        store.reject_value("lang:", "UnprocessableEntity");
        let sync = RuleSynchronizer::new(store.clone());
        let err = sync
            .apply(&desired(&[("ok", "cats"), ("bad", "lang:")]), false)
            .await
            .unwrap_err();
        match err {
            RuleSyncError::InvalidRule { title, value } => {
                assert_eq!(title, "UnprocessableEntity");
                assert_eq!(value, "lang:");
            }
            other => panic!("expected InvalidRule, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let store = Arc::new(MemoryRuleStore::new());
        let sync = RuleSynchronizer::new(store.clone());
        let summary = sync.apply(&desired(&[("t", "cats")]), true).await.unwrap();
        assert!(summary.dry_run);
        assert!(store.rules().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_remote_unavailable() {
        let store = Arc::new(MemoryRuleStore::new());
        store.set_unreachable(true);
        let sync = RuleSynchronizer::new(store.clone());
        let err = sync.reset_all().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RulesRemoteUnavailable);
        let err = sync.apply(&RuleSet::new(), false).await.unwrap_err();
        assert!(matches!(err, RuleSyncError::RemoteUnavailable { .. }));
    }

    #[test]
    fn duplicate_is_recoverable() {
        let err = RuleSyncError::Duplicate { value: "x".into() };
        assert!(!err.is_fatal());
        let err = RuleSyncError::InvalidRule {
            title: "t".into(),
            value: "v".into(),
        };
        assert!(err.is_fatal());
    }
}
