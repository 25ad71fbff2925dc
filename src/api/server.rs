use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{
        health, list_partitions, metrics, partition_failures, partition_summary, reset_entry,
        reset_partition, watcher_status,
    },
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/partitions", get(list_partitions))
        .route("/partitions/{id}/summary", get(partition_summary))
        .route("/partitions/{id}/failures", get(partition_failures))
        .route("/partitions/{id}/reset", post(reset_partition))
        .route(
            "/partitions/{id}/items/{item}/destinations/{dest}/reset",
            post(reset_entry),
        )
        .route("/watchers/{name}", get(watcher_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status API until `shutdown` is cancelled
pub async fn run(
    address: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), AnyError> {
    let listener = TcpListener::bind(address).await?;
    info!(%address, "Status API listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Status API stopped");
    Ok(())
}
