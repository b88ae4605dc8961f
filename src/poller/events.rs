//! Events broadcast by the session manager.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::connection::ConnectionState;
use crate::source::JobId;
use crate::subtask::SubtaskName;

/// Lifecycle and progress notifications for the current job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// Polling began for a job.
    SessionStarted { run_id: Uuid, job_id: JobId },
    /// The connection state changed.
    ConnectionChanged {
        run_id: Uuid,
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<String>,
    },
    /// New subtask payloads were merged.
    ResultsMerged {
        run_id: Uuid,
        subtasks: Vec<SubtaskName>,
        progress: u8,
        pending: usize,
    },
    /// The next query is scheduled.
    PollScheduled {
        run_id: Uuid,
        delay_ms: u64,
        empty_polls: u32,
    },
    /// Every subtask is in (or the server said stop).
    Completed {
        run_id: Uuid,
        job_id: JobId,
        results: usize,
    },
    /// A query failed; polling stopped.
    Failed { run_id: Uuid, error: String },
    /// The consumer stopped polling.
    Stopped { run_id: Uuid, job_id: JobId },
}

impl PollEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::SessionStarted { run_id, .. }
            | Self::ConnectionChanged { run_id, .. }
            | Self::ResultsMerged { run_id, .. }
            | Self::PollScheduled { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::Stopped { run_id, .. } => *run_id,
        }
    }
}
