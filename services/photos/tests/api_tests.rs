mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use common::Harness;
use photo_service::api::IDENTITY_HEADER;
use photo_service::config::ApiConfig;
use photo_service::{create_router, AppState, PushHub};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn api_config() -> ApiConfig {
    ApiConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_enabled: false,
        cors_origins: Vec::new(),
    }
}

fn router(h: &Harness) -> Router {
    create_router(
        AppState {
            lifecycle: h.lifecycle.clone(),
            push_hub: Arc::new(PushHub::new()),
            sessions: h.sessions.clone(),
        },
        &api_config(),
    )
}

async fn call(router: Router, method: Method, uri: &str, identity: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(identity) = identity {
        request = request.header(IDENTITY_HEADER, identity);
    }

    let response = router
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_list_own_photos() {
    let h = Harness::new();
    let photo = h.active_photo("a@b.com", "abc.png", Utc::now());

    let (status, body) = call(
        router(&h),
        Method::GET,
        "/api/v1/photos?ownership=own",
        Some("a@b.com"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], photo.id.to_string());
    assert_eq!(body["data"][0]["image"], "d2F0ZXJtYXJrZWQ=");
}

#[tokio::test]
async fn test_missing_identity_is_forbidden() {
    let h = Harness::new();

    let (status, body) = call(router(&h), Method::GET, "/api/v1/photos?ownership=own", None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_invalid_ownership_is_bad_request() {
    let h = Harness::new();

    let (status, body) = call(
        router(&h),
        Method::GET,
        "/api/v1/photos?ownership=everyone",
        Some("a@b.com"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_recycle_restore_and_delete_over_http() {
    let h = Harness::new();
    let photo = h.active_photo("a@b.com", "abc.png", Utc::now());
    let base = format!("/api/v1/photos/{}", photo.id);

    let (status, body) = call(
        router(&h),
        Method::PATCH,
        &format!("{base}/recycle-bin"),
        Some("a@b.com"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "recycled");

    let (status, body) = call(
        router(&h),
        Method::PATCH,
        &format!("{base}/recycle-bin"),
        Some("a@b.com"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STATE_CONFLICT");

    let (status, body) = call(
        router(&h),
        Method::GET,
        "/api/v1/photos/recycle-bin",
        Some("a@b.com"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["objectKey"], "recycled/a@b.com/abc.png");

    let (status, _) = call(
        router(&h),
        Method::GET,
        &format!("{base}/share-url"),
        Some("a@b.com"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(router(&h), Method::DELETE, &base, Some("a@b.com")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.photos.record(photo.id).is_none());
}

#[tokio::test]
async fn test_share_url_for_foreign_photo_is_forbidden() {
    let h = Harness::new();
    let photo = h.active_photo("a@b.com", "abc.png", Utc::now());

    let (status, _) = call(
        router(&h),
        Method::GET,
        &format!("/api/v1/photos/{}/share-url", photo.id),
        Some("c@d.com"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let h = Harness::new();

    let (status, body) = call(router(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(router(&h), Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}
