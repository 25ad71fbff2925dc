//! Response bodies of the status API.
//!
//! Summaries, failure reports and watcher reports are serialized straight
//! from [`crate::status`]; this module only holds the envelopes the API adds.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub partitions: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub partition: String,
    pub reset: usize,
}
