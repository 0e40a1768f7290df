use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{response_json, test_app, test_jwt, RequestBuilderExt};

fn bearer() -> String {
    let token = dbgateway_server::auth::issue(&test_jwt(), "alice").expect("issue test token");
    format!("Bearer {token}")
}

#[tokio::test]
async fn list_customers_without_auth_is_unauthorized() {
    let app = test_app().await;
    let resp = app.oneshot(Request::get("/customers").body(axum::body::Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_list_then_delete_customer() {
    let app = test_app().await;

    let create_resp = app
        .clone()
        .oneshot(
            Request::post("/customers")
                .header("Authorization", bearer())
                .json(json!({ "name": "Ada Lovelace", "email": "ada@example.com" })),
        )
        .await
        .unwrap();
    assert_eq!(create_resp.status(), StatusCode::CREATED);
    let created = response_json(create_resp).await;
    let id = created["id"].as_i64().expect("created customer has an id");
    assert_eq!(created["email"], "ada@example.com");

    let list_resp = app
        .clone()
        .oneshot(Request::get("/customers").header("Authorization", bearer()).empty_body())
        .await
        .unwrap();
    assert_eq!(list_resp.status(), StatusCode::OK);
    let listed = response_json(list_resp).await;
    assert!(listed.as_array().unwrap().iter().any(|c| c["id"] == id));

    let delete_resp = app
        .clone()
        .oneshot(Request::delete(format!("/customers/{id}")).header("Authorization", bearer()).empty_body())
        .await
        .unwrap();
    assert_eq!(delete_resp.status(), StatusCode::OK);

    let get_after_delete = app
        .oneshot(Request::get(format!("/customers/{id}")).header("Authorization", bearer()).empty_body())
        .await
        .unwrap();
    assert_eq!(get_after_delete.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_unknown_customer_is_not_found() {
    let app = test_app().await;
    let resp = app
        .oneshot(Request::get("/customers/999999").header("Authorization", bearer()).empty_body())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
