//! Matching API regression tests.
//!
//! Drives the axum router end-to-end over an in-memory job index:
//! claim/complete/stats wire shapes, validation, and the canonical
//! reserve-then-claim flow.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use hoist_api::build_router;
use hoist_core::{Job, JobStatus};
use hoist_index::JobIndex;

fn test_index() -> JobIndex {
    JobIndex::open_in_memory().unwrap()
}

fn test_job(id: &str, rules: &[&str]) -> Job {
    Job {
        id: id.to_string(),
        queue_key: "default".to_string(),
        agent_query_rules: rules.iter().map(|s| s.to_string()).collect(),
        priority: 0,
        scheduled_at: 1000,
        reserved_at: 1010,
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let router = build_router(test_index());

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn claim_without_query_is_bad_request() {
    let router = build_router(test_index());

    let req = Request::builder().uri("/jobs").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn claim_empty_index_returns_no_content() {
    let router = build_router(test_index());

    let req = Request::builder()
        .uri("/jobs?query=queue=default")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn claim_unmatched_rules_on_populated_index_returns_no_content() {
    let index = test_index();
    index.insert(&test_job("j1", &["queue=default"])).unwrap();
    let router = build_router(index);

    let req = Request::builder()
        .uri("/jobs?query=nonexistent=rule")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn equivalent_rule_orders_share_one_fifo_queue() {
    let index = test_index();
    index
        .insert(&test_job("j1", &["queue=default", "arch=amd64"]))
        .unwrap();
    index
        .insert(&test_job("j2", &["arch=amd64", "queue=default"]))
        .unwrap();
    let router = build_router(index.clone());

    // A worker advertising the rules in yet another order drains the
    // queue in insertion order.
    let req = Request::builder()
        .uri("/jobs?query=queue=default,arch=amd64")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let first: Job = serde_json::from_value(body_json(resp).await).unwrap();
    assert_eq!(first.id, "j1");

    let req = Request::builder()
        .uri("/jobs?query=queue=default,arch=amd64")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let second: Job = serde_json::from_value(body_json(resp).await).unwrap();
    assert_eq!(second.id, "j2");

    // Drained.
    let req = Request::builder().uri("/stats").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let stats = body_json(resp).await;
    assert_eq!(stats["total"], 0);

    // Completion lands on the metadata record.
    let req = Request::builder()
        .method("POST")
        .uri("/jobs/j1/complete")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        index.metadata("j1").unwrap().unwrap().status,
        JobStatus::Complete
    );
}

#[tokio::test]
async fn stats_reports_queue_lengths_and_total() {
    let index = test_index();
    index.insert(&test_job("a", &["queue=default"])).unwrap();
    index.insert(&test_job("b", &["queue=default"])).unwrap();
    index.insert(&test_job("c", &["arch=arm64"])).unwrap();
    let router = build_router(index);

    let req = Request::builder().uri("/stats").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let stats = body_json(resp).await;
    assert_eq!(stats["queues"]["queue=default"], 2);
    assert_eq!(stats["queues"]["arch=arm64"], 1);
    assert_eq!(stats["total"], 3);
}

#[tokio::test]
async fn complete_unknown_id_is_ok() {
    let router = build_router(test_index());

    let req = Request::builder()
        .method("POST")
        .uri("/jobs/ghost/complete")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}
