use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{test_app, RequestBuilderExt};

#[tokio::test]
async fn login_with_unknown_username_is_unauthorized() {
    let app = test_app().await;

    let resp = app
        .oneshot(Request::post("/login").json(json!({ "username": "nobody", "password": "whatever" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_without_a_token_is_unauthorized() {
    let app = test_app().await;
    let resp = app.oneshot(Request::post("/logout").empty_body()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_malformed_body_is_bad_request() {
    let app = test_app().await;

    let resp = app
        .oneshot(
            Request::post("/login")
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
