use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::workflows::hiring::router::pipeline_router;

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("request builds")
}

fn empty_request(method: &str, uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .expect("request builds")
}

#[tokio::test]
async fn register_route_accepts_intake_payloads() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    let router = pipeline_router(service);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/applications",
            json!({ "candidate_id": "cand-9", "job_id": "job-9" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn duplicate_registration_returns_conflict() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    service.register(intake("app-r1")).expect("registers");
    let router = pipeline_router(service);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/applications",
            json!({
                "application_id": "app-r1",
                "candidate_id": "cand-r1",
                "job_id": "job-r1",
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_route_reports_missing_applications() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    let router = pipeline_router(service);

    let response = router
        .oneshot(empty_request(
            "GET",
            "/api/v1/pipeline/applications/app-none",
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn advance_route_progresses_a_stage() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    service.register(intake("app-r2")).expect("registers");
    let router = pipeline_router(service);

    let response = router
        .oneshot(empty_request(
            "POST",
            "/api/v1/pipeline/applications/app-r2/advance",
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn runs_route_lists_recorded_attempts() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    let record = service.register(intake("app-r3")).expect("registers");
    service
        .advance(&record.application_id)
        .await
        .expect("company stage completes");
    let router = pipeline_router(service);

    let response = router
        .oneshot(empty_request(
            "GET",
            "/api/v1/pipeline/applications/app-r3/runs",
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bias_batch_route_reports_an_empty_queue() {
    let (service, _store, _gateway, _publisher) = build_service(test_config());
    let router = pipeline_router(service);

    let response = router
        .oneshot(empty_request("POST", "/api/v1/pipeline/bias-batch"))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
}
