//! Per-job polling context and its read-only snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::{ConnectionState, ConnectionTracker};
use super::merge::{MergeOutcome, PendingSet, ResultSet};
use super::progress::CompletionTracker;
use crate::source::{Cursor, DecodeFailure, FetchResponse, JobId, decode_results};
use crate::subtask::SubtaskName;

/// Every mutable entity of one job's polling run.
///
/// Owned by exactly one loop task; a new job gets a fresh context.
#[derive(Debug)]
pub struct JobContext {
    pub run_id: Uuid,
    pub job_id: JobId,
    pub results: ResultSet,
    pub tracker: CompletionTracker,
    pub connection: ConnectionTracker,
    pub cursor: Option<Cursor>,
    /// Consecutive polls that merged nothing.
    pub empty_polls: u32,
    /// Queries issued so far.
    pub polls: u32,
    pub loading_started_at: Option<DateTime<Utc>>,
    loading_started: Option<Instant>,
    pub last_error: Option<String>,
}

/// What applying one response changed.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub merge: MergeOutcome,
    pub decode_failures: Vec<DecodeFailure>,
}

impl JobContext {
    /// Fresh context: nothing merged, everything in `enumeration` pending,
    /// no cursor, connecting, loading clock started now.
    pub fn new(job_id: JobId, enumeration: impl IntoIterator<Item = SubtaskName>) -> Self {
        let mut tracker = CompletionTracker::new();
        tracker.seed(enumeration);

        let mut connection = ConnectionTracker::new();
        connection.reset_for_new_job();

        Self {
            run_id: Uuid::new_v4(),
            job_id,
            results: ResultSet::new(),
            tracker,
            connection,
            cursor: None,
            empty_polls: 0,
            polls: 0,
            loading_started_at: Some(Utc::now()),
            loading_started: Some(Instant::now()),
            last_error: None,
        }
    }

    /// Instant at which a still-unanswered job should count as waking.
    pub fn waking_deadline(&self, threshold: Duration) -> Option<Instant> {
        if self.connection.state() != ConnectionState::Connecting {
            return None;
        }
        self.loading_started.map(|start| start + threshold)
    }

    /// Polling ended; the loading clock no longer applies.
    pub fn finish_loading(&mut self) {
        self.loading_started = None;
        self.loading_started_at = None;
    }

    /// Move the cursor forward. A missing cursor keeps the current one and a
    /// numerically smaller one is ignored.
    pub fn advance_cursor(&mut self, next: Option<Cursor>) {
        let Some(next) = next else {
            return;
        };
        if let Some(current) = &self.cursor {
            if next.rewinds(current) {
                warn!(
                    job_id = %self.job_id,
                    current = %current.as_str(),
                    proposed = %next.as_str(),
                    "Ignoring cursor that would move backwards"
                );
                return;
            }
        }
        self.cursor = Some(next);
    }

    /// Fold a successful response into this context.
    pub fn apply_response(&mut self, response: FetchResponse) -> ApplyOutcome {
        let FetchResponse {
            new_results,
            next_cursor,
            scheduling,
        } = response;

        self.advance_cursor(next_cursor);

        let decoded = decode_results(new_results);
        let merge = self
            .results
            .merge(decoded.payloads, self.tracker.pending_mut());
        self.tracker.remove_completed(&merge.merged);

        if let Some(hints) = &scheduling {
            self.tracker
                .override_total(hints.total_subtasks, hints.completed_subtasks);
        }

        if merge.has_new_data() {
            self.empty_polls = 0;
        } else {
            self.empty_polls = self.empty_polls.saturating_add(1);
        }

        debug!(
            job_id = %self.job_id,
            merged = merge.merged.len(),
            failed = decoded.failures.len(),
            pending = self.tracker.pending().len(),
            empty_polls = self.empty_polls,
            "Applied poll response"
        );

        ApplyOutcome {
            merge,
            decode_failures: decoded.failures,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            run_id: Some(self.run_id),
            job_id: Some(self.job_id.clone()),
            results: self.results.clone(),
            pending: self.tracker.pending().clone(),
            progress: self.tracker.progress(),
            total: self.tracker.total(),
            connection: self.connection.state(),
            loading_started_at: self.loading_started_at,
            last_error: self.last_error.clone(),
            cursor: self.cursor.clone(),
            empty_polls: self.empty_polls,
            polls: self.polls,
        }
    }
}

/// Consumer-facing read model of the current job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobSnapshot {
    pub run_id: Option<Uuid>,
    pub job_id: Option<JobId>,
    pub results: ResultSet,
    pub pending: PendingSet,
    pub progress: u8,
    pub total: usize,
    pub connection: ConnectionState,
    pub loading_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cursor: Option<Cursor>,
    pub empty_polls: u32,
    pub polls: u32,
}

impl JobSnapshot {
    pub fn is_active(&self) -> bool {
        !self.connection.is_terminal()
    }
}
