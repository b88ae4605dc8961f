//! Completion tracking: pending set, expected total, and derived progress.

use tracing::{debug, warn};

use super::merge::PendingSet;
use crate::subtask::SubtaskName;

/// Owns the pending/total/progress triple for one job.
///
/// A server-reported total is sticky: once reported it replaces the local
/// figure for the rest of the job. Completed work is always `total - |pending|`.
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    pending: PendingSet,
    expected: usize,
    server_total: Option<u32>,
    forced_complete: bool,
    last_progress: u8,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new job: everything in `enumeration` is pending.
    pub fn seed(&mut self, enumeration: impl IntoIterator<Item = SubtaskName>) {
        self.pending = enumeration.into_iter().collect();
        self.expected = self.pending.len();
        self.server_total = None;
        self.forced_complete = false;
        self.last_progress = 0;
    }

    /// Remove completed subtasks from the pending set.
    pub fn remove_completed<'a>(&mut self, names: impl IntoIterator<Item = &'a SubtaskName>) {
        for name in names {
            self.pending.remove(name);
        }
        self.observe_progress();
    }

    /// Apply totals reported by the server. An absent total leaves the
    /// current one untouched.
    ///
    /// The server's completed count only applies to the response carrying it
    /// and is checked against the local count, never stored.
    pub fn override_total(&mut self, server_total: Option<u32>, server_completed: Option<u32>) {
        if server_total.is_some() {
            self.server_total = server_total;
        }
        if let Some(reported) = server_completed {
            let local = self.completed();
            if reported as usize != local {
                debug!(
                    reported,
                    local,
                    total = self.total(),
                    "Server completed count differs from merged results"
                );
            }
        }
        self.observe_progress();
    }

    /// Mark the job finished regardless of what is still pending.
    pub fn force_complete(&mut self) {
        self.pending.clear();
        self.forced_complete = true;
        self.last_progress = 100;
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Expected number of subtasks, preferring the server's figure.
    pub fn total(&self) -> usize {
        self.server_total
            .map(|t| t as usize)
            .unwrap_or(self.expected)
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    /// Subtasks accounted for: `total - |pending|`, saturating.
    pub fn completed(&self) -> usize {
        self.total().saturating_sub(self.pending.len())
    }

    /// Mutable pending set, for the merger.
    pub(crate) fn pending_mut(&mut self) -> &mut PendingSet {
        &mut self.pending
    }

    /// Completion percentage in `0..=100`, rounded to nearest.
    pub fn progress(&self) -> u8 {
        if self.forced_complete {
            return 100;
        }

        let total = self.total();
        if total == 0 {
            return if self.is_complete() { 100 } else { 0 };
        }

        let pct = (self.completed() as f64 * 100.0 / total as f64).round();
        pct.clamp(0.0, 100.0) as u8
    }

    /// Server totals are mirrored even when they shrink; a visible
    /// regression is only logged.
    fn observe_progress(&mut self) {
        let now = self.progress();
        if now < self.last_progress {
            warn!(
                previous = self.last_progress,
                current = now,
                total = self.total(),
                "Progress regressed after server-reported totals changed"
            );
        }
        self.last_progress = now;
    }
}
