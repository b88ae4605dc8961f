//! Remote result source: where subtask outputs come from.
//!
//! - `types`: wire types (job id, cursor, scheduling hints, payload decoding)
//! - `http`: reqwest-backed implementation against the analysis API

pub mod http;
pub mod types;

use async_trait::async_trait;

use crate::error::SourceError;

pub use http::HttpResultSource;
pub use types::{
    Cursor, DecodeFailure, FetchResponse, JobId, Recommendation, SchedulingHints, decode_results,
};

/// Idempotent query for newly available subtask outputs of one job.
///
/// Calling it twice with the same cursor must not lose results; the engine
/// never issues two calls for the same job concurrently.
#[async_trait]
pub trait ResultSource: Send + Sync {
    /// Fetch results discovered after `since` (everything when `None`).
    async fn fetch_results(
        &self,
        job_id: &JobId,
        since: Option<&Cursor>,
    ) -> Result<FetchResponse, SourceError>;
}
