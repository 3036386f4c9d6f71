// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`RuleStore`] with the provider's duplicate and rejection
//! semantics.

use crate::store::{
    AddMeta, AddRulesResponse, AddSummary, DeleteMeta, DeleteRulesResponse, DeleteSummary,
    RemoteRule, RuleError, RuleStore, RuleStoreError,
};
use async_trait::async_trait;
use relay_core::{AddRulesRequest, DeleteRulesRequest};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    rules: Vec<RemoteRule>,
    next_id: u64,
    rejections: HashMap<String, String>,
    unreachable: bool,
    add_calls: usize,
    delete_calls: usize,
}

impl State {
    fn insert(&mut self, tag: Option<String>, value: String) -> RemoteRule {
        self.next_id += 1;
        let rule = RemoteRule {
            id: format!("{}", 1_000 + self.next_id),
            value,
            tag,
        };
        self.rules.push(rule.clone());
        rule
    }
}

/// A rule store held in memory.
///
/// Adding a value that is already registered reports `DuplicateRule`;
/// values registered with [`reject_value`](Self::reject_value) report the
/// given title.
#[derive(Default)]
pub struct MemoryRuleStore {
    state: Mutex<State>,
}

impl MemoryRuleStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `(tag, value)` rules.
    pub fn with_rules<'a>(rules: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for (tag, value) in rules {
                state.insert(Some(tag.to_string()), value.to_string());
            }
        }
        store
    }

    /// Make every future add of `value` fail with `title`.
    pub fn reject_value(&self, value: impl Into<String>, title: impl Into<String>) {
        self.lock().rejections.insert(value.into(), title.into());
    }

    /// Simulate an outage: every call fails while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Snapshot of the registered rules, in registration order.
    pub fn rules(&self) -> Vec<RemoteRule> {
        self.lock().rules.clone()
    }

    /// Number of add calls received.
    pub fn add_calls(&self) -> usize {
        self.lock().add_calls
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(state: &State) -> Result<(), RuleStoreError> {
        if state.unreachable {
            Err(RuleStoreError::Unreachable("store offline".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MemoryRuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRuleStore")
            .field("rules", &self.lock().rules.len())
            .finish()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list(&self) -> Result<Vec<RemoteRule>, RuleStoreError> {
        let state = self.lock();
        Self::check_reachable(&state)?;
        Ok(state.rules.clone())
    }

    async fn add(
        &self,
        body: &AddRulesRequest,
        dry_run: bool,
    ) -> Result<AddRulesResponse, RuleStoreError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        state.add_calls += 1;

        let mut response = AddRulesResponse::default();
        let mut accepted = Vec::new();
        for spec in &body.add {
            let existing = state
                .rules
                .iter()
                .chain(accepted.iter())
                .find(|r: &&RemoteRule| r.value == spec.value)
                .map(|r| r.id.clone());
            if let Some(id) = existing {
                response.errors.push(RuleError {
                    title: RuleError::DUPLICATE.into(),
                    value: Some(spec.value.clone()),
                    id: Some(id),
                    detail: None,
                    kind: None,
                });
            } else if let Some(title) = state.rejections.get(&spec.value) {
                response.errors.push(RuleError {
                    title: title.clone(),
                    value: Some(spec.value.clone()),
                    id: None,
                    detail: None,
                    kind: None,
                });
            } else {
                accepted.push(RemoteRule {
                    id: String::new(),
                    value: spec.value.clone(),
                    tag: Some(spec.tag.clone()),
                });
            }
        }

        let valid = accepted.len() as u32;
        let invalid = response.errors.len() as u32;
        let created = if dry_run {
            0
        } else {
            for rule in accepted {
                let stored = state.insert(rule.tag, rule.value);
                response.data.push(stored);
            }
            valid
        };
        response.meta = AddMeta {
            sent: None,
            summary: AddSummary {
                created,
                not_created: body.add.len() as u32 - created,
                valid,
                invalid,
            },
        };
        Ok(response)
    }

    async fn delete(
        &self,
        body: &DeleteRulesRequest,
    ) -> Result<DeleteRulesResponse, RuleStoreError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        state.delete_calls += 1;

        let mut response = DeleteRulesResponse::default();
        let mut deleted = 0;
        for id in body.ids() {
            let before = state.rules.len();
            state.rules.retain(|r| &r.id != id);
            if state.rules.len() < before {
                deleted += 1;
            } else {
                response.errors.push(RuleError {
                    title: "NotFound".into(),
                    value: None,
                    id: Some(id.clone()),
                    detail: Some("rule does not exist".into()),
                    kind: None,
                });
            }
        }
        response.meta = DeleteMeta {
            sent: None,
            summary: DeleteSummary {
                deleted,
                not_deleted: body.ids().len() as u32 - deleted,
            },
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Rule, RuleSet};

    #[tokio::test]
    async fn duplicate_within_one_request_is_reported() {
        let store = MemoryRuleStore::new();
        let set: RuleSet = [Rule::new("a", "cats"), Rule::new("b", "cats")]
            .into_iter()
            .collect();
        let resp = store.add(&set.add_request(), false).await.unwrap();
        assert_eq!(resp.meta.summary.created, 1);
        assert!(resp.errors[0].is_duplicate());
        assert_eq!(store.rules().len(), 1);
    }

    #[tokio::test]
    async fn delete_unknown_id_reports_error() {
        let store = MemoryRuleStore::with_rules([("a", "cats")]);
        let resp = store
            .delete(&DeleteRulesRequest::new(["nope".to_string()]))
            .await
            .unwrap();
        assert_eq!(resp.meta.summary.not_deleted, 1);
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(store.rules().len(), 1);
    }
}
