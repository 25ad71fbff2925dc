use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use relaybox::api::{AppState, router};
use relaybox::ledger::{FjallLedger, ItemState, Ledger, LedgerKey, Transition};
use relaybox::model::{FailureClass, ItemDescriptor};
use relaybox::observability::Metrics;

/// Builds the router over a ledger seeded with one partition:
/// item `a` completed on `d1` and abandoned on `d2`, item `b` discovered.
fn build_test_app() -> (Router, Arc<FjallLedger>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let ledger = Arc::new(
        FjallLedger::open(temp_dir.path().join("ledger")).expect("Failed to open test ledger"),
    );

    ledger
        .bind_destinations("1999", &["d1".to_string(), "d2".to_string()])
        .unwrap();
    for item in ["a", "b"] {
        let descriptor = ItemDescriptor::builder()
            .id(item)
            .name(format!("{item}.mp4"))
            .build();
        for dest in ["d1", "d2"] {
            ledger
                .upsert(
                    &LedgerKey::new("1999", item, dest),
                    Transition::Discover(descriptor.clone()),
                )
                .unwrap();
        }
    }

    let staged = Transition::FinishDownload {
        staged_path: temp_dir.path().join("a.mp4"),
        size: 3,
        checksum: "abc".to_string(),
    };
    for transition in [
        Transition::BeginDownload,
        staged.clone(),
        Transition::BeginUpload,
        Transition::Complete {
            reference: "d1:a".to_string(),
        },
    ] {
        ledger
            .upsert(&LedgerKey::new("1999", "a", "d1"), transition)
            .unwrap();
    }
    for transition in [
        Transition::BeginDownload,
        staged,
        Transition::BeginUpload,
        Transition::Fail {
            class: FailureClass::Permanent,
            message: "video rejected".to_string(),
        },
        Transition::Abandon,
    ] {
        ledger
            .upsert(&LedgerKey::new("1999", "a", "d2"), transition)
            .unwrap();
    }

    let metrics = Arc::new(Metrics::new());
    metrics.publish_completed();
    let state = AppState::new(ledger.clone(), metrics);

    (router(state), ledger, temp_dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = json_body(response).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["partitions"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let metrics = json_body(response).await;
    assert_eq!(metrics["publishes_completed"], 1);
    assert_eq!(metrics["entries_abandoned"], 0);
}

#[tokio::test]
async fn test_partition_summary() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/partitions/1999/summary")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = json_body(response).await;
    assert_eq!(summary["items"], 2);
    assert_eq!(summary["entries"], 4);
    assert_eq!(summary["by_state"]["completed"], 1);
    assert_eq!(summary["by_state"]["abandoned"], 1);
    assert_eq!(summary["by_state"]["discovered"], 2);
    assert_eq!(summary["by_destination"]["d2"]["abandoned"], 1);
}

#[tokio::test]
async fn test_partition_summary_not_found() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/partitions/2024/summary")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let error = json_body(response).await;
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_list_partitions() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/partitions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let partitions = json_body(response).await;
    assert_eq!(partitions.as_array().unwrap().len(), 1);
    assert_eq!(partitions[0]["partition"], "1999");
}

#[tokio::test]
async fn test_partition_failures() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/partitions/1999/failures")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let failures = json_body(response).await;
    let failures = failures.as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["item_id"], "a");
    assert_eq!(failures[0]["destination"], "d2");
    assert_eq!(failures[0]["state"], "abandoned");
    assert_eq!(failures[0]["last_error"]["class"], "permanent");
    assert_eq!(failures[0]["last_error"]["message"], "video rejected");
}

#[tokio::test]
async fn test_reset_entry() {
    let (app, ledger, _temp_dir) = build_test_app();
    let uri = "/partitions/1999/items/a/destinations/d2/reset";

    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), post(uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entry = json_body(response).await;
    assert_eq!(entry["state"], "discovered");
    assert_eq!(entry["attempts"], 0);

    let stored = ledger
        .get(&LedgerKey::new("1999", "a", "d2"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, ItemState::Discovered);

    // no longer abandoned, so a second reset conflicts
    let response = app.oneshot(post(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn test_reset_completed_entry_conflicts() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app
        .oneshot(post("/partitions/1999/items/a/destinations/d1/reset"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reset_partition() {
    let (app, ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(post("/partitions/1999/reset")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let reset = json_body(response).await;
    assert_eq!(reset["partition"], "1999");
    assert_eq!(reset["reset"], 1);

    let failures: Vec<_> = ledger
        .list_by_partition("1999")
        .unwrap()
        .into_iter()
        .filter(|e| e.state.is_failure())
        .collect();
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_watcher_not_found() {
    let (app, _ledger, _temp_dir) = build_test_app();

    let response = app.oneshot(get("/watchers/nas")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
