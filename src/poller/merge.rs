//! Result merging: folds newly available payloads into the accumulated set.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::subtask::SubtaskName;

/// Subtasks not yet present in the result set.
pub type PendingSet = BTreeSet<SubtaskName>;

/// What a single merge added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Subtasks inserted by this merge, in name order.
    pub merged: Vec<SubtaskName>,
}

impl MergeOutcome {
    pub fn has_new_data(&self) -> bool {
        !self.merged.is_empty()
    }
}

/// Accumulated subtask payloads for one job.
///
/// A key, once present, keeps its first value for the lifetime of the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    entries: BTreeMap<SubtaskName, serde_json::Value>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch, skipping keys that are already present, and remove
    /// every newly merged key from `pending`.
    pub fn merge(
        &mut self,
        batch: BTreeMap<SubtaskName, serde_json::Value>,
        pending: &mut PendingSet,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for (name, payload) in batch {
            if self.entries.contains_key(&name) {
                continue;
            }
            pending.remove(&name);
            self.entries.insert(name.clone(), payload);
            outcome.merged.push(name);
        }

        outcome
    }

    pub fn get(&self, name: &SubtaskName) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &SubtaskName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
