use axum::http::{Request, StatusCode};
use tower::ServiceExt;

mod common;

use common::test_app;

#[tokio::test]
async fn health_requires_no_auth() {
    let app = test_app().await;
    let resp = app.oneshot(Request::get("/health").body(axum::body::Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_reports_the_primary_pool() {
    let app = test_app().await;
    let resp = app.oneshot(Request::get("/status").body(axum::body::Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = common::response_json(resp).await;
    let pools = body["pools"].as_array().expect("pools array");
    assert!(pools.iter().any(|p| p["pool"] == "primary"));
}

#[tokio::test]
async fn metrics_requires_auth() {
    let app = test_app().await;
    let resp = app.oneshot(Request::get("/metrics").body(axum::body::Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
