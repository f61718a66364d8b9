use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::crud;
use super::schema::{
    CreatePolicyRequest, CreatePolicyResponse, PolicyInfoResponse, PolicyTestQuery,
    PolicyTestResponse, PolicyVersionListItem, ReloadPolicyResponse, ValidatePolicyRequest,
    ValidatePolicyResponse,
};
use crate::app::AppState;
use crate::errors::AppError;
use crate::service::auth_service::require_bearer;
use crate::service::policy_engine_service::{self, EvalCall};
use crate::service::policy_parser_service::validate_source;

pub async fn get_current_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PolicyInfoResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let record = crud::current_record(&state)?;
    let snapshot = crud::current_snapshot(&state)?;

    // Rule listing re-parses the stored source; the snapshot only confirms
    // the count matches what is actually being evaluated.
    let outcome = validate_source(&record.source, false);
    let rules = outcome
        .parsed
        .map(|p| {
            p.rules
                .iter()
                .map(crate::service::policy_parser_service::rule_listing)
                .collect()
        })
        .unwrap_or_default();

    Ok(Json(PolicyInfoResponse {
        version: record.version,
        hash: record.fingerprint,
        description: record.description,
        rules_count: snapshot.rules.len(),
        rules,
        created_at: record.created_at,
        active: record.active,
    }))
}

pub async fn validate_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ValidatePolicyRequest>,
) -> Result<Json<ValidatePolicyResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let outcome = crud::validate_policy(&req.policy_content, req.strict);
    Ok(Json(ValidatePolicyResponse {
        is_valid: outcome.is_valid(),
        rules_count: if outcome.is_valid() { outcome.rules_count } else { 0 },
        version: outcome.version.clone(),
        errors: outcome.errors,
        warnings: outcome.warnings,
    }))
}

pub async fn create_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<CreatePolicyResponse>), AppError> {
    require_bearer(&state.config, &headers)?;
    let resp = crud::create_policy(&state, req).await?;
    let status = if resp.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(resp)))
}

pub async fn reload_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReloadPolicyResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let resp = crud::reload_policy(&state).await?;
    info!(
        status = %resp.status,
        old_version = %resp.old_version,
        new_version = %resp.new_version,
        "policy reload"
    );
    Ok(Json(resp))
}

pub async fn list_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PolicyVersionListItem>>, AppError> {
    require_bearer(&state.config, &headers)?;
    let versions = crud::list_versions(&state)?
        .into_iter()
        .map(|record| PolicyVersionListItem {
            policy_id: record.policy_id,
            version: record.version,
            fingerprint: record.fingerprint,
            description: record.description,
            created_at: record.created_at,
            active: record.active,
        })
        .collect();
    Ok(Json(versions))
}

/// Dry-run a tool call against the active policy. No audit side effect.
pub async fn test_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PolicyTestQuery>,
) -> Result<Json<PolicyTestResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let tool_args = parse_json_param("tool_args", query.tool_args.as_deref())?;
    let session_context = parse_json_param("session_context", query.session_context.as_deref())?;

    let snapshot = crud::current_snapshot(&state)?;
    let context_map = session_context.as_object().cloned().unwrap_or_default();
    let empty = serde_json::Map::new();
    let decision = policy_engine_service::evaluate(
        &snapshot,
        &EvalCall {
            tool_name: &query.tool_name,
            tool_args: &tool_args,
            session_context: &context_map,
            metadata: &empty,
            now: Utc::now(),
        },
    );

    Ok(Json(PolicyTestResponse {
        tool_name: query.tool_name,
        tool_args,
        session_context,
        decision: decision.into(),
    }))
}

fn parse_json_param(name: &str, raw: Option<&str>) -> Result<Value, AppError> {
    match raw {
        None | Some("") => Ok(Value::Object(serde_json::Map::new())),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| AppError::bad_request("VALIDATION", format!("invalid JSON in {name}: {e}"))),
    }
}
