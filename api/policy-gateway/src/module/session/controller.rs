use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::info;

use super::crud::{self, SessionFilter};
use super::model::LogEntryRecord;
use super::schema::{
    ArchiveResponse, ArchiveSessionRequest, BulkArchiveRequest, DeleteSessionResponse, ExportQuery,
    ListSessionsQuery, SessionEntriesQuery, SessionEntriesResponse, SessionListResponse,
};
use crate::app::AppState;
use crate::errors::AppError;
use crate::service::auth_service::require_bearer;

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<SessionListResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let filter = SessionFilter {
        agent_id: query.agent_id,
        user_id: query.user_id,
        include_archived: query.include_archived,
        start: query.start_date,
        end: query.end_date,
    };
    let (sessions, total_count) = crud::list_sessions(&state, &filter, page, page_size)?;
    Ok(Json(SessionListResponse {
        sessions,
        total_count,
        page,
        page_size,
    }))
}

pub async fn get_session_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<SessionEntriesQuery>,
) -> Result<Json<SessionEntriesResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let (entries, total_count) = crud::session_entries(&state, &session_id, page, page_size)?;
    Ok(Json(SessionEntriesResponse {
        session_id,
        entries,
        total_count,
        page,
        page_size,
    }))
}

pub async fn get_session_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<super::model::SessionSummary>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(crud::session_summary(&state, &session_id)?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let logs_deleted = crud::delete_session(&state, &session_id).await?;
    info!(session_id = %session_id, logs_deleted, "session deleted");
    Ok(Json(DeleteSessionResponse {
        status: "deleted".to_string(),
        session_id,
        logs_deleted,
    }))
}

pub async fn archive_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(req): Json<ArchiveSessionRequest>,
) -> Result<Json<ArchiveResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let report = crud::archive_sessions(
        &state,
        std::slice::from_ref(&session_id),
        req.retention_days,
        req.archived_by,
    )
    .await?;
    if report.archived.is_empty() {
        return Err(AppError::not_found("SESSION_NOT_FOUND", "session not found"));
    }
    info!(session_id = %session_id, retention_until = report.retention_until, "session archived");
    Ok(Json(ArchiveResponse {
        archived: report.archived,
        missing: report.missing,
        retention_until: report.retention_until,
    }))
}

pub async fn bulk_archive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BulkArchiveRequest>,
) -> Result<Json<ArchiveResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    if req.session_ids.is_empty() {
        return Err(AppError::bad_request("VALIDATION", "session_ids must not be empty"));
    }
    let report =
        crud::archive_sessions(&state, &req.session_ids, req.retention_days, req.archived_by).await?;
    info!(
        archived = report.archived.len(),
        missing = report.missing.len(),
        "bulk archive completed"
    );
    Ok(Json(ArchiveResponse {
        archived: report.archived,
        missing: report.missing,
        retention_until: report.retention_until,
    }))
}

pub async fn export_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    require_bearer(&state.config, &headers)?;
    let filter = SessionFilter {
        agent_id: query.agent_id,
        user_id: query.user_id,
        include_archived: query.include_archived,
        start: query.start_date,
        end: query.end_date,
    };
    let entries = crud::export_entries(&state, &filter, query.session_id.as_deref())?;

    match query.format.as_str() {
        "json" => {
            let body = serde_json::to_string(&entries)
                .map_err(|e| AppError::internal("EXPORT_ENCODE_ERROR", e.to_string()))?;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response())
        }
        "csv" => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv")],
            render_csv(&entries),
        )
            .into_response()),
        other => Err(AppError::bad_request(
            "VALIDATION",
            format!("unsupported export format '{other}'"),
        )),
    }
}

fn render_csv(entries: &[LogEntryRecord]) -> String {
    let mut out = String::from(
        "session_id,seq_index,log_id,timestamp,tool_name,tool_args,policy_version,decision,rule_name,reason,status,error_message,duration_ms,bypass,prev_hash,own_hash\n",
    );
    for entry in entries {
        let fields = [
            entry.session_id.clone(),
            entry.seq_index.to_string(),
            entry.log_id.clone(),
            entry.timestamp.to_string(),
            entry.tool_name.clone(),
            entry.tool_args.to_string(),
            entry.policy_version.clone(),
            entry.decision.as_str().to_string(),
            entry.rule_name.clone().unwrap_or_default(),
            entry.reason.clone(),
            entry.status.as_str().to_string(),
            entry.error_message.clone().unwrap_or_default(),
            entry.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
            entry.bypass.to_string(),
            entry.prev_hash.clone(),
            entry.own_hash.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
