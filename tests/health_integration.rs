//! Health endpoint integration tests.
//!
//! These tests drive the router in-process using axum's test utilities.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use status_relay::health::create_router;
use tower::ServiceExt;

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Helper to extract body as string.
async fn response_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = create_router()
        .oneshot(request(Method::GET, "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, "running");
}

#[tokio::test]
async fn test_root_endpoint() {
    let response = create_router()
        .oneshot(request(Method::GET, "/"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, "running");
}

#[tokio::test]
async fn test_unknown_route() {
    let response = create_router()
        .oneshot(request(Method::GET, "/sessions"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_method() {
    let response = create_router()
        .oneshot(request(Method::POST, "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
