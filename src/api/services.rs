use axum::{
    Json,
    extract::{Path, State},
};

use super::{
    error::ApiError,
    models::{HealthResponse, ResetResponse},
    state::AppState,
};
use crate::ledger::{LedgerEntry, LedgerKey};
use crate::observability::MetricsSnapshot;
use crate::status::{FailureReport, PartitionSummary, WatcherReport};

/// Liveness plus a cheap ledger read (GET /health)
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let partitions = state.reporter.overview()?.len();
    Ok(Json(HealthResponse {
        status: "ok",
        partitions,
    }))
}

/// Engine counters since process start (GET /metrics)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Summaries of every partition (GET /partitions)
pub async fn list_partitions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PartitionSummary>>, ApiError> {
    Ok(Json(state.reporter.overview()?))
}

/// Per-state and per-destination counts (GET /partitions/{id}/summary)
pub async fn partition_summary(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<PartitionSummary>, ApiError> {
    let summary = state.reporter.summary(&partition)?;
    if summary.entries == 0 {
        return Err(ApiError::NotFound(format!("partition {partition}")));
    }
    Ok(Json(summary))
}

/// Failed and abandoned entries with their last error
/// (GET /partitions/{id}/failures)
pub async fn partition_failures(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<Vec<FailureReport>>, ApiError> {
    Ok(Json(state.reporter.failures(&partition)?))
}

/// Last cycle report and cursor of a watcher (GET /watchers/{name})
pub async fn watcher_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WatcherReport>, ApiError> {
    let report = state.reporter.watcher(&name)?;
    if report.state.is_none() && report.cursor.is_none() && report.summary.entries == 0 {
        return Err(ApiError::NotFound(format!("watcher {name}")));
    }
    Ok(Json(report))
}

/// Reset every abandoned entry of a partition (POST /partitions/{id}/reset)
pub async fn reset_partition(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let reset = state.admin.reset_partition(&partition)?;
    Ok(Json(ResetResponse {
        partition,
        reset: reset.len(),
    }))
}

/// Reset one abandoned entry
/// (POST /partitions/{id}/items/{item}/destinations/{dest}/reset)
pub async fn reset_entry(
    State(state): State<AppState>,
    Path((partition, item, destination)): Path<(String, String, String)>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let key = LedgerKey::new(partition, item, destination);
    Ok(Json(state.admin.reset(&key)?))
}
