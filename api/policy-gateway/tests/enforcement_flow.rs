mod common;

use common::{app_with_policy, get_json, post_json, test_app, test_config};
use http::StatusCode;
use policy_gateway::module::enforcement::schema::{
    StatusResponse, ToolCallResponse, UpdateResultResponse,
};
use policy_gateway::module::session::model::Action;
use policy_gateway::module::session::schema::SessionEntriesResponse;
use serde_json::{json, Value};

const POLICY: &str = r#"
version: "test-v1"
description: "enforcement flow policy"
rules:
  - name: "deny_system_paths"
    action: deny
    tools: ["read_file"]
    conditions:
      arg_contains:
        path: "/etc/|/sys/"
    reason: "system paths are off limits"
  - name: "allow_reads"
    action: allow
    tools: ["read_file"]
  - name: "approve_home_deletes"
    action: approve
    tools: ["delete_file"]
    conditions:
      arg_contains:
        path: "/home/"
    reason: "deletes under /home need a human"
default_action: deny
default_reason: "nothing matched"
"#;

#[tokio::test]
async fn safe_read_is_allowed_logged_and_sealed_once() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;

    let (status, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "read_file",
            "tool_args": {"path": "/tmp/a"},
            "session_id": "s1",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision.decision, Action::Allow);
    assert_eq!(decision.rule_name.as_deref(), Some("allow_reads"));
    assert_eq!(decision.policy_version, "test-v1");
    assert_eq!(decision.session_id, "s1");

    let (status, logs) =
        get_json::<SessionEntriesResponse>(app.clone(), "/api/v1/sessions/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.entries.len(), 1);
    assert_eq!(logs.entries[0].seq_index, 1);
    assert_eq!(logs.entries[0].status.as_str(), "pending");

    let result_path = format!("/api/v1/enforce/s1/result?log_id={}", decision.log_id);
    let (status, sealed) = post_json::<_, UpdateResultResponse>(
        app.clone(),
        &result_path,
        &json!({"status": "success", "result": {"bytes": 12}, "execution_duration_ms": 4.2}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sealed.status, "ok");
    assert_eq!(sealed.log_id, decision.log_id);

    // A second, identical seal conflicts; the stored outcome is unchanged.
    let (status, err) = post_json::<_, Value>(
        app.clone(),
        &result_path,
        &json!({"status": "success", "result": {"bytes": 12}}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error_code"], json!("OUTCOME_ALREADY_SEALED"));

    let (_, logs) =
        get_json::<SessionEntriesResponse>(app.clone(), "/api/v1/sessions/s1", None).await;
    assert_eq!(logs.entries[0].status.as_str(), "success");
    assert_eq!(logs.entries[0].result, Some(json!({"bytes": 12})));
}

#[tokio::test]
async fn system_path_is_denied_but_still_audited() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;

    let (status, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "read_file",
            "tool_args": {"path": "/etc/passwd"},
            "session_id": "s2",
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision.decision, Action::Deny);
    assert_eq!(decision.reason, "system paths are off limits");

    // The denial is written regardless.
    let (_, logs) =
        get_json::<SessionEntriesResponse>(app.clone(), "/api/v1/sessions/s2", None).await;
    assert_eq!(logs.entries.len(), 1);
    assert_eq!(logs.entries[0].decision, Action::Deny);
}

#[tokio::test]
async fn approval_decision_reaches_subscribers() {
    let (app, state) = app_with_policy(POLICY, "test-v1").await;
    let mut rx = state.events.subscribe();

    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "delete_file",
            "tool_args": {"path": "/home/u/x"},
            "session_id": "s3",
        }),
        None,
    )
    .await;
    assert_eq!(decision.decision, Action::Approve);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.session_id, "s3");
    assert_eq!(event.entry["log_id"], json!(decision.log_id));
    assert_eq!(event.entry["decision"], json!("approve"));
}

#[tokio::test]
async fn generated_session_ids_are_fresh_per_call() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;

    let body = json!({"tool_name": "read_file", "tool_args": {"path": "/tmp/a"}});
    let (_, first) =
        post_json::<_, ToolCallResponse>(app.clone(), "/api/v1/enforce", &body, None).await;
    let (_, second) =
        post_json::<_, ToolCallResponse>(app.clone(), "/api/v1/enforce", &body, None).await;
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.session_id.len(), 32);
}

#[tokio::test]
async fn update_result_rejects_cross_session_and_unknown_ids() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;

    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({"tool_name": "read_file", "tool_args": {"path": "/tmp/a"}, "session_id": "sa"}),
        None,
    )
    .await;
    post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({"tool_name": "read_file", "tool_args": {"path": "/tmp/a"}, "session_id": "sb"}),
        None,
    )
    .await;

    let (status, err) = post_json::<_, Value>(
        app.clone(),
        &format!("/api/v1/enforce/sb/result?log_id={}", decision.log_id),
        &json!({"status": "success"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_code"], json!("SESSION_MISMATCH"));

    let (status, _) = post_json::<_, Value>(
        app.clone(),
        "/api/v1/enforce/sa/result?log_id=does-not-exist",
        &json!({"status": "success"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json::<_, Value>(
        app.clone(),
        &format!("/api/v1/enforce/sa/result?log_id={}", decision.log_id),
        &json!({"status": "running"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_tool_name_is_a_validation_error() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;
    let (status, err) = post_json::<_, Value>(
        app.clone(),
        "/api/v1/enforce",
        &json!({"tool_name": "", "tool_args": {}}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_code"], json!("VALIDATION"));
}

#[tokio::test]
async fn bearer_auth_rejects_unauthenticated_callers() {
    let mut config = test_config();
    config.api_key = Some("sekrit".to_string());
    let (app, _state) = test_app(config);

    let body = json!({"tool_name": "read_file", "tool_args": {}});
    let (status, err) = post_json::<_, Value>(app.clone(), "/api/v1/enforce", &body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error_code"], json!("UNAUTHENTICATED"));

    let (status, _) =
        post_json::<_, Value>(app.clone(), "/api/v1/enforce", &body, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn context_conditions_see_caller_overlays() {
    let source = r#"
version: "ctx-v1"
rules:
  - name: "allow_admin"
    action: allow
    tools: ["*"]
    conditions:
      session_context:
        role: ["admin"]
default_action: deny
"#;
    let (app, _state) = app_with_policy(source, "ctx-v1").await;

    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "shell_exec",
            "tool_args": {},
            "session_id": "ctx",
            "context": {"role": "admin"},
        }),
        None,
    )
    .await;
    assert_eq!(decision.decision, Action::Allow);

    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "shell_exec",
            "tool_args": {},
            "session_id": "ctx",
        }),
        None,
    )
    .await;
    assert_eq!(decision.decision, Action::Deny);
}

#[tokio::test]
async fn bypass_mode_allows_everything_but_still_audits() {
    let mut config = test_config();
    config.bypass_mode = true;
    let (app, _state) = test_app(config);
    common::create_policy(&app, POLICY, "test-v1", true).await;

    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({
            "tool_name": "read_file",
            "tool_args": {"path": "/etc/passwd"},
            "session_id": "byp",
        }),
        None,
    )
    .await;
    assert_eq!(decision.decision, Action::Allow);
    assert_eq!(decision.rule_name.as_deref(), Some("bypass_mode"));
    assert!(decision.bypass);

    let (_, logs) =
        get_json::<SessionEntriesResponse>(app.clone(), "/api/v1/sessions/byp", None).await;
    assert_eq!(logs.entries.len(), 1);
    assert!(logs.entries[0].bypass);
}

#[tokio::test]
async fn status_surfaces_development_mode() {
    let (app, _state) = app_with_policy(POLICY, "test-v1").await;
    let (status, body) = get_json::<StatusResponse>(app.clone(), "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "ok");
    assert_eq!(body.policy_version, "test-v1");
    assert!(!body.auth_enabled);
    assert!(!body.bypass_mode);
}
