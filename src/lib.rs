//! Portfolio Poll: adaptive polling and partial-result reconciliation for
//! remote portfolio-analysis jobs.

pub mod api;
pub mod config;
pub mod error;
pub mod poller;
pub mod source;
pub mod subtask;
