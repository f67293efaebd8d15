//! Integration tests for health, probe and metrics endpoints.

mod common;

use axum::http::StatusCode;
use common::{get_request, TestApp};

#[tokio::test]
async fn test_health_on_memory_backend() {
    let app = TestApp::new();
    let (status, body) = app.send(get_request("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["database"]["used"], false);
    assert_eq!(body["payment_provider"], "mock");
    assert!(!body["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_probes() {
    let app = TestApp::new();

    let (status, live) = app.send(get_request("/api/health/live")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["status"], "alive");

    let (status, ready) = app.send(get_request("/api/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["status"], "ready");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new();
    let request = axum::http::Request::builder()
        .uri("/api/health/live")
        .header("x-request-id", "ski-req-42")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "ski-req-42"
    );
}

#[tokio::test]
async fn test_unknown_route() {
    let app = TestApp::new();
    let (status, _) = app.send(get_request("/api/v1/nothing-here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
