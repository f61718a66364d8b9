use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;

use super::crud;
use super::schema::{
    CleanupQuery, CleanupResponse, ComplianceReport, IntegrityQuery, IntegrityResponse,
    ReportQuery, ReportRequest, RetentionStatusResponse,
};
use crate::app::AppState;
use crate::errors::AppError;
use crate::service::auth_service::require_bearer;

pub async fn generate_report_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ComplianceReport>, AppError> {
    require_bearer(&state.config, &headers)?;
    let report_type = query.report_type.as_deref().unwrap_or("summary");
    Ok(Json(
        crud::generate_report(&state, query.start_date, query.end_date, report_type).await?,
    ))
}

pub async fn generate_report_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ComplianceReport>, AppError> {
    require_bearer(&state.config, &headers)?;
    let report_type = req.report_type.as_deref().unwrap_or("summary");
    Ok(Json(
        crud::generate_report(&state, req.start_date, req.end_date, report_type).await?,
    ))
}

pub async fn retention_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RetentionStatusResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(crud::retention_status(&state)?))
}

pub async fn retention_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(crud::cleanup(&state, query.dry_run).await?))
}

pub async fn verify_integrity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IntegrityQuery>,
) -> Result<Json<IntegrityResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(crud::verify_integrity(
        &state,
        query.start_date,
        query.end_date,
        query.session_id.as_deref(),
    )?))
}
