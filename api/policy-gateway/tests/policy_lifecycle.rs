mod common;

use common::{app_with_policy, create_policy, get_json, post_json};
use http::StatusCode;
use policy_gateway::module::enforcement::schema::ToolCallResponse;
use policy_gateway::module::policy::schema::{
    PolicyInfoResponse, PolicyTestResponse, PolicyVersionListItem, ValidatePolicyResponse,
};
use policy_gateway::module::session::model::Action;
use policy_gateway::module::session::schema::SessionEntriesResponse;
use serde_json::{json, Value};

const V1: &str = r#"
version: "v1"
rules:
  - name: "allow_reads"
    action: allow
    tools: ["read_file"]
default_action: deny
"#;

const V2: &str = r#"
version: "v2"
rules:
  - name: "allow_reads"
    action: allow
    tools: ["read_file"]
  - name: "deny_network"
    action: deny
    tools: ["http_get"]
    reason: "network egress is disabled"
default_action: deny
"#;

#[tokio::test]
async fn activation_switches_the_enforced_version() {
    let (app, _state) = app_with_policy(V1, "v1").await;

    // Enforcement under v1: http_get falls through to the default deny.
    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({"tool_name": "http_get", "tool_args": {}, "session_id": "lc"}),
        None,
    )
    .await;
    assert_eq!(decision.policy_version, "v1");
    assert_eq!(decision.rule_name, None);

    let resp = create_policy(&app, V2, "v2", true).await;
    assert!(resp.success);
    assert!(resp.activated);

    let (_, info) = get_json::<PolicyInfoResponse>(app.clone(), "/api/v1/policy/current", None).await;
    assert_eq!(info.version, "v2");
    assert_eq!(info.rules_count, 2);
    assert!(info.active);

    // The same call now hits v2's explicit deny rule.
    let (_, decision) = post_json::<_, ToolCallResponse>(
        app.clone(),
        "/api/v1/enforce",
        &json!({"tool_name": "http_get", "tool_args": {}, "session_id": "lc"}),
        None,
    )
    .await;
    assert_eq!(decision.policy_version, "v2");
    assert_eq!(decision.rule_name.as_deref(), Some("deny_network"));
    assert_eq!(decision.reason, "network egress is disabled");

    // Entries written under v1 keep their version tag.
    let (_, logs) =
        get_json::<SessionEntriesResponse>(app.clone(), "/api/v1/sessions/lc", None).await;
    assert_eq!(logs.entries[0].policy_version, "v1");
    assert_eq!(logs.entries[1].policy_version, "v2");
}

#[tokio::test]
async fn exactly_one_version_is_active() {
    let (app, _state) = app_with_policy(V1, "v1").await;
    create_policy(&app, V2, "v2", true).await;

    let (_, versions) =
        get_json::<Vec<PolicyVersionListItem>>(app.clone(), "/api/v1/policy/versions", None).await;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
    assert!(versions.iter().find(|v| v.version == "v2").unwrap().active);
}

#[tokio::test]
async fn create_is_idempotent_for_identical_content_and_conflicts_otherwise() {
    let (app, _state) = app_with_policy(V1, "v1").await;

    let again = create_policy(&app, V1, "v1", false).await;
    assert!(again.success);
    assert_eq!(again.message, "policy version already exists");

    let (status, err) = post_json::<_, Value>(
        app.clone(),
        "/api/v1/policy/create",
        &json!({"policy_content": V2, "version": "v1", "activate": false}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error_code"], json!("VERSION_CONFLICT"));
}

#[tokio::test]
async fn invalid_policy_is_rejected_with_field_detail() {
    let (app, _state) = app_with_policy(V1, "v1").await;

    let bad = r#"
version: "bad"
rules:
  - name: "broken"
    action: maybe
  - action: allow
  - name: "legacy"
    action: allow
    conditions:
      cascade:
        x: 1
"#;
    let (status, resp) = post_json::<_, ValidatePolicyResponse>(
        app.clone(),
        "/api/v1/policy/validate",
        &json!({"policy_content": bad}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!resp.is_valid);
    assert!(resp.errors.iter().any(|e| e.contains("maybe")));
    assert!(resp.errors.iter().any(|e| e.contains("'name'")));
    assert!(resp.errors.iter().any(|e| e.contains("cascade")));

    // Creating from invalid content fails without storing anything.
    let (status, create) = post_json::<_, Value>(
        app.clone(),
        "/api/v1/policy/create",
        &json!({"policy_content": bad, "version": "bad", "activate": true}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(create["success"], json!(false));
    assert!(!create["validation_errors"].as_array().unwrap().is_empty());

    let (_, versions) =
        get_json::<Vec<PolicyVersionListItem>>(app.clone(), "/api/v1/policy/versions", None).await;
    assert!(versions.iter().all(|v| v.version != "bad"));
}

#[tokio::test]
async fn duplicate_rule_names_warn_by_default_and_fail_strict() {
    let (app, _state) = app_with_policy(V1, "v1").await;
    let dup = r#"
version: "dup"
rules:
  - name: "r"
    action: allow
  - name: "r"
    action: deny
"#;
    let (_, lax) = post_json::<_, ValidatePolicyResponse>(
        app.clone(),
        "/api/v1/policy/validate",
        &json!({"policy_content": dup}),
        None,
    )
    .await;
    assert!(lax.is_valid);
    assert_eq!(lax.warnings.len(), 1);

    let (_, strict) = post_json::<_, ValidatePolicyResponse>(
        app.clone(),
        "/api/v1/policy/validate",
        &json!({"policy_content": dup, "strict": true}),
        None,
    )
    .await;
    assert!(!strict.is_valid);
}

#[tokio::test]
async fn policy_test_endpoint_has_no_audit_side_effect() {
    let (app, _state) = app_with_policy(V1, "v1").await;

    let args = serde_json::to_string(&json!({"path": "/tmp/a"})).unwrap();
    let path = format!(
        "/api/v1/policy/test?tool_name=read_file&tool_args={}",
        urlencode(&args)
    );
    let (status, resp) = get_json::<PolicyTestResponse>(app.clone(), &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp.decision.action, Action::Allow);
    assert_eq!(resp.decision.rule_name.as_deref(), Some("allow_reads"));
    assert_eq!(resp.tool_args, json!({"path": "/tmp/a"}));

    // No session, no log entry.
    let (_, sessions) = get_json::<Value>(app.clone(), "/api/v1/sessions", None).await;
    assert_eq!(sessions["total_count"], json!(0));
}

#[tokio::test]
async fn policy_test_rejects_malformed_json_params() {
    let (app, _state) = app_with_policy(V1, "v1").await;
    let (status, err) = get_json::<Value>(
        app.clone(),
        "/api/v1/policy/test?tool_name=read_file&tool_args=not-json",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_code"], json!("VALIDATION"));
}

#[tokio::test]
async fn reload_requires_a_tracked_policy_file() {
    let (app, _state) = app_with_policy(V1, "v1").await;
    let (status, err) = post_json::<_, Value>(
        app.clone(),
        "/api/v1/policy/reload",
        &json!({}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_code"], json!("NO_POLICY_FILE"));
}

fn urlencode(raw: &str) -> String {
    let mut out = String::new();
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
