//! Enforcement orchestration: resolve the session, snapshot the active
//! policy, evaluate, append the chained audit entry, fan out, respond.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::schema::{ToolCallRequest, ToolCallResponse, UpdateResultRequest, UpdateResultResponse};
use crate::app::AppState;
use crate::errors::AppError;
use crate::module::policy::crud as policy_crud;
use crate::module::session::crud as session_crud;
use crate::module::session::model::{Action, OutcomeStatus};
use crate::service::events_service::{self, EntryEvent, EventKind};
use crate::service::metrics_service;
use crate::service::policy_engine_service::{self, Decision, EvalCall};

pub async fn enforce(state: &AppState, req: ToolCallRequest) -> Result<ToolCallResponse, AppError> {
    if req.tool_name.trim().is_empty() {
        return Err(AppError::bad_request("VALIDATION", "tool_name is required"));
    }
    if !req.tool_args.is_object() && !req.tool_args.is_null() {
        return Err(AppError::bad_request("VALIDATION", "tool_args must be a JSON object"));
    }
    metrics_service::inc_enforce_requests();

    let session_id = match &req.session_id {
        Some(id) if !id.trim().is_empty() => id.clone(),
        _ => session_crud::generate_session_id(),
    };
    let tool_args = if req.tool_args.is_null() {
        Value::Object(Map::new())
    } else {
        req.tool_args.clone()
    };

    let snapshot = policy_crud::current_snapshot(state)?;
    let decision = if state.config.bypass_mode {
        Decision {
            action: Action::Allow,
            rule_name: Some("bypass_mode".to_string()),
            reason: "Policy enforcement bypassed".to_string(),
            policy_version: snapshot.version.clone(),
        }
    } else {
        let session_context = build_session_context(state, &session_id, &req)?;
        let metadata = req
            .metadata
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        policy_engine_service::evaluate(
            &snapshot,
            &EvalCall {
                tool_name: &req.tool_name,
                tool_args: &tool_args,
                session_context: &session_context,
                metadata: &metadata,
                // Single wall-clock sample for the whole evaluation.
                now: Utc::now(),
            },
        )
    };
    metrics_service::record_decision(decision.action);

    let entry = session_crud::append_decision(
        state,
        session_crud::NewEntry {
            session_id: Some(session_id.clone()),
            agent_id: req.agent_id.clone(),
            user_id: req.user_id.clone(),
            session_metadata: req.metadata.clone(),
            tool_name: req.tool_name.clone(),
            tool_args,
            policy_version: decision.policy_version.clone(),
            decision: decision.action,
            rule_name: decision.rule_name.clone(),
            reason: decision.reason.clone(),
            bypass: state.config.bypass_mode,
        },
    )
    .await?;

    publish_entry_event(state, EventKind::Decision, &entry).await;

    info!(
        session_id = %entry.session_id,
        tool_name = %entry.tool_name,
        decision = entry.decision.as_str(),
        rule_name = entry.rule_name.as_deref().unwrap_or("-"),
        log_id = %entry.log_id,
        policy_version = %entry.policy_version,
        "tool call decision"
    );

    Ok(ToolCallResponse {
        session_id: entry.session_id,
        decision: entry.decision,
        rule_name: entry.rule_name,
        reason: entry.reason,
        policy_version: entry.policy_version,
        log_id: entry.log_id,
        timestamp: entry.timestamp,
        bypass: entry.bypass,
    })
}

pub async fn update_result(
    state: &AppState,
    session_id: &str,
    log_id: &str,
    req: UpdateResultRequest,
) -> Result<UpdateResultResponse, AppError> {
    let status = match req.status.as_str() {
        "success" => OutcomeStatus::Success,
        "error" => OutcomeStatus::Error,
        other => {
            return Err(AppError::bad_request(
                "VALIDATION",
                format!("status must be 'success' or 'error', got '{other}'"),
            ))
        }
    };

    let entry = session_crud::seal_outcome(
        state,
        session_id,
        log_id,
        session_crud::OutcomeUpdate {
            status,
            result: req.result,
            error_message: req.error_message,
            duration_ms: req.execution_duration_ms,
        },
    )
    .await?;
    metrics_service::inc_outcomes_sealed();

    publish_entry_event(state, EventKind::Result, &entry).await;

    info!(
        session_id = %entry.session_id,
        log_id = %entry.log_id,
        status = entry.status.as_str(),
        "tool call outcome sealed"
    );

    Ok(UpdateResultResponse {
        status: "ok".to_string(),
        log_id: entry.log_id,
    })
}

/// Session identity and stored metadata, overlaid with caller-supplied
/// context. Caller keys win over stored metadata keys.
fn build_session_context(
    state: &AppState,
    session_id: &str,
    req: &ToolCallRequest,
) -> Result<Map<String, Value>, AppError> {
    let mut context = Map::new();
    context.insert("session_id".to_string(), Value::String(session_id.to_string()));

    let stored = session_crud::get_session(state, session_id).ok();
    let agent_id = req.agent_id.clone().or(stored.as_ref().and_then(|s| s.agent_id.clone()));
    let user_id = req.user_id.clone().or(stored.as_ref().and_then(|s| s.user_id.clone()));
    if let Some(agent_id) = agent_id {
        context.insert("agent_id".to_string(), Value::String(agent_id));
    }
    if let Some(user_id) = user_id {
        context.insert("user_id".to_string(), Value::String(user_id));
    }
    if let Some(metadata) = stored.and_then(|s| s.metadata) {
        if let Some(map) = metadata.as_object() {
            for (key, value) in map {
                context.insert(key.clone(), value.clone());
            }
        }
    }
    if let Some(overlay) = &req.context {
        let Some(map) = overlay.as_object() else {
            return Err(AppError::bad_request("VALIDATION", "context must be a JSON object"));
        };
        for (key, value) in map {
            context.insert(key.clone(), value.clone());
        }
    }
    Ok(context)
}

async fn publish_entry_event(
    state: &AppState,
    kind: EventKind,
    entry: &crate::module::session::model::LogEntryRecord,
) {
    let payload = match serde_json::to_value(entry) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "entry event encode failed");
            return;
        }
    };
    let event = EntryEvent {
        kind,
        session_id: entry.session_id.clone(),
        entry: payload,
    };
    state.events.publish(event.clone());
    if let Some(infra) = &state.infra {
        events_service::mirror_to_redis(infra, &event).await;
    }
}
