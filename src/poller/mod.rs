//! Polling engine: retrieves partial results of a remote analysis job.
//!
//! Core components:
//! - `merge`: at-most-once folding of subtask payloads
//! - `progress`: pending set, expected total, progress percentage
//! - `backoff`: delay before the next query
//! - `connection`: connection state machine (Idle → Connecting → Waking/Connected/Error)
//! - `context`: per-job mutable state and its snapshot
//! - `session`: lifecycle manager owning the single polling loop

pub mod backoff;
pub mod connection;
pub mod context;
pub mod events;
pub mod merge;
pub mod progress;
pub mod session;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionState, ConnectionTracker};
pub use context::{JobContext, JobSnapshot};
pub use events::PollEvent;
pub use merge::{MergeOutcome, PendingSet, ResultSet};
pub use progress::CompletionTracker;
pub use session::SessionManager;
