#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, StatusCode};
use policy_gateway::app::{build_router, AppState};
use policy_gateway::config::environment::AppConfig;
use policy_gateway::module::policy::schema::CreatePolicyResponse;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::util::ServiceExt;

pub fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        audit_hmac_secret: "test-chain-secret".to_string(),
        api_key: None,
        bypass_mode: false,
        policy_file: None,
        mongodb_url: None,
        mongodb_database: None,
        redis_url: None,
        request_timeout_seconds: 30,
        sweeper_enabled: false,
        sweeper_interval_seconds: 3600,
        event_buffer_size: 64,
    }
}

pub fn test_app(config: AppConfig) -> (Router, AppState) {
    let state = AppState::new(config, None);
    (build_router(state.clone()), state)
}

/// App with the given policy created and activated through the API.
pub async fn app_with_policy(source: &str, version: &str) -> (Router, AppState) {
    let (app, state) = test_app(test_config());
    let resp = create_policy(&app, source, version, true).await;
    assert!(resp.success, "policy setup failed: {:?}", resp.validation_errors);
    (app, state)
}

pub async fn create_policy(
    app: &Router,
    source: &str,
    version: &str,
    activate: bool,
) -> CreatePolicyResponse {
    let (status, resp) = post_json::<_, CreatePolicyResponse>(
        app.clone(),
        "/api/v1/policy/create",
        &serde_json::json!({
            "policy_content": source,
            "version": version,
            "activate": activate,
        }),
        None,
    )
    .await;
    assert!(
        status == StatusCode::OK || status == StatusCode::BAD_REQUEST,
        "unexpected create status {status}"
    );
    resp
}

pub async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
    app: Router,
    path: &str,
    body: &Req,
    bearer: Option<&str>,
) -> (StatusCode, Resp) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    send(app, request).await
}

pub async fn get_json<Resp: DeserializeOwned>(
    app: Router,
    path: &str,
    bearer: Option<&str>,
) -> (StatusCode, Resp) {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = builder.body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn delete_json<Resp: DeserializeOwned>(
    app: Router,
    path: &str,
) -> (StatusCode, Resp) {
    let request = Request::builder()
        .method("DELETE")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn get_raw(app: Router, path: &str) -> (StatusCode, String, Option<String>) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap(), content_type)
}

async fn send<Resp: DeserializeOwned>(app: Router, request: Request<Body>) -> (StatusCode, Resp) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        panic!(
            "response body did not parse ({e}): {}",
            String::from_utf8_lossy(&bytes)
        )
    });
    (status, parsed)
}
