use super::*;
use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::model::{BinaryFile, encode_data_url};
use crate::services::sync::SyncError;
use crate::state::test_helpers::{TestApp, seed_page, seed_user, test_app};
use serde_json::json;

#[test]
fn backend_error_to_status_maps_variants() {
    assert_eq!(backend_error_to_status(&BackendError::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(backend_error_to_status(&BackendError::Conflict("x".into())), StatusCode::CONFLICT);
    assert_eq!(backend_error_to_status(&BackendError::Auth), StatusCode::UNAUTHORIZED);
    assert_eq!(backend_error_to_status(&BackendError::Transfer("x".into())), StatusCode::BAD_GATEWAY);
}

#[test]
fn api_error_carries_code_and_retryable_flag() {
    let err = SyncError::Backend(BackendError::Transfer("storage down".into()));
    let api = ApiError::from_error(StatusCode::BAD_GATEWAY, &err);
    assert_eq!(api.code, "E_TRANSFER");
    assert!(api.retryable);
    assert!(api.message.contains("storage down"));

    let response = api.into_response();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[test]
fn bad_request_is_not_retryable() {
    let api = ApiError::bad_request("nope");
    assert_eq!(api.status, StatusCode::BAD_REQUEST);
    assert!(!api.retryable);
}

#[tokio::test]
async fn healthz_returns_ok() {
    assert_eq!(healthz().await, StatusCode::OK);
}

#[tokio::test]
async fn app_builds_with_state() {
    let app = test_app();
    let _router = super::app(app.state, DEFAULT_MAX_BODY_BYTES);
}

/// Serve the router on an ephemeral port and return its base URL.
async fn serve(app: &TestApp, max_body_bytes: usize) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = super::app(app.state.clone(), max_body_bytes);
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

/// A scene push carrying one inline attachment of `bytes` raw bytes.
fn push_with_attachment(bytes: usize) -> serde_json::Value {
    let file = BinaryFile {
        id: "big".into(),
        mime_type: "image/png".into(),
        data_url: encode_data_url("image/png", &vec![7u8; bytes]),
        created: 1,
        last_retrieved: None,
    };
    json!({
        "elements": [{"id": "img", "type": "image", "fileId": "big"}],
        "files": {"big": file},
    })
}

#[tokio::test]
async fn scene_push_over_two_mebibytes_is_accepted() {
    let app = test_app();
    let (owner, token) = seed_user(&app, "owner@x.test").await;
    let page_id = seed_page(&app, owner.id).await.page_id;
    let base = serve(&app, DEFAULT_MAX_BODY_BYTES).await;
    let client = reqwest::Client::new();

    let opened = client
        .post(format!("{base}/api/pages/{page_id}/open"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(opened.status(), reqwest::StatusCode::OK);

    let body = push_with_attachment(3 * 1024 * 1024);
    let pushed = client
        .put(format!("{base}/api/pages/{page_id}/scene"))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(pushed.status(), reqwest::StatusCode::OK);

    let saved = client
        .post(format!("{base}/api/pages/{page_id}/save"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(saved.status(), reqwest::StatusCode::OK);
    assert_eq!(app.objects.upload_count(), 1);
}

#[tokio::test]
async fn body_over_configured_limit_is_rejected() {
    let app = test_app();
    let (owner, token) = seed_user(&app, "owner@x.test").await;
    let page_id = seed_page(&app, owner.id).await.page_id;
    let base = serve(&app, 16 * 1024).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/pages/{page_id}/open"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let pushed = client
        .put(format!("{base}/api/pages/{page_id}/scene"))
        .bearer_auth(&token)
        .json(&push_with_attachment(48 * 1024))
        .send()
        .await
        .unwrap();
    assert_eq!(pushed.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}
