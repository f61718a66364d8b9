//! Compliance operations: report assembly, retention status, sweeper
//! invocation and chain verification. All reads go through the audit
//! store; integrity violations are reported, never remediated here.

use tracing::info;

use super::schema::{
    CleanupResponse, ComplianceReport, IntegrityResponse, RetentionComplianceSection,
    RetentionSection, RetentionStatusResponse, ReportMetadata, RiskSection, UsageSection,
    VerificationPeriod,
};
use crate::app::AppState;
use crate::errors::AppError;
use crate::module::policy::crud as policy_crud;
use crate::module::session::crud as session_crud;
use crate::service::metrics_service;

const RETENTION_HORIZON_DAYS: i64 = 30;
const ACTION_PREVIEW_LIMIT: usize = 10;

pub async fn generate_report(
    state: &AppState,
    start: Option<i64>,
    end: Option<i64>,
    report_type: &str,
) -> Result<ComplianceReport, AppError> {
    if !matches!(report_type, "summary" | "detailed") {
        return Err(AppError::bad_request(
            "VALIDATION",
            format!("report_type must be 'summary' or 'detailed', got '{report_type}'"),
        ));
    }

    let now = session_crud::now_unix();
    let stats = session_crud::range_stats(state, start, end)?;
    let integrity = session_crud::verify_range(state, start, end, None)?;
    let overdue = session_crud::retention_candidates(state, now)?;
    let upcoming = session_crud::retention_upcoming(state, now, RETENTION_HORIZON_DAYS)?;
    let policy_version = policy_crud::current_record(state)
        .map(|record| record.version)
        .unwrap_or_else(|_| "unknown".to_string());

    let violation_rate = if stats.total_calls > 0 {
        stats.denied_calls as f64 / stats.total_calls as f64
    } else {
        0.0
    };

    let detailed_entries = if report_type == "detailed" {
        let filter = session_crud::SessionFilter {
            include_archived: true,
            start,
            end,
            ..Default::default()
        };
        Some(session_crud::export_entries(state, &filter, None)?)
    } else {
        None
    };

    info!(
        report_type,
        total_calls = stats.total_calls,
        violations = stats.denied_calls,
        chain_intact = integrity.chain_intact,
        "compliance report assembled"
    );

    Ok(ComplianceReport {
        report_metadata: ReportMetadata {
            generated_at: now,
            period_start: start,
            period_end: end,
            report_type: report_type.to_string(),
            policy_version,
        },
        usage: UsageSection {
            total_tool_calls: stats.total_calls,
            allowed_calls: stats.allowed_calls,
            denied_calls: stats.denied_calls,
            approval_required: stats.approval_required,
            unique_agents: stats.unique_agents,
            unique_users: stats.unique_users,
        },
        risk_assessment: RiskSection {
            policy_violations: stats.denied_calls,
            violation_rate,
            pending_outcomes: stats.pending_outcomes,
        },
        retention: RetentionSection {
            archived_sessions: stats.archived_sessions,
            upcoming_deletions: upcoming.len() as u64,
            overdue_deletions: overdue.len() as u64,
            retention_policy_compliant: overdue.is_empty(),
        },
        integrity,
        detailed_entries,
    })
}

pub fn retention_status(state: &AppState) -> Result<RetentionStatusResponse, AppError> {
    let now = session_crud::now_unix();
    let mut upcoming = session_crud::retention_upcoming(state, now, RETENTION_HORIZON_DAYS)?;
    let mut overdue = session_crud::retention_candidates(state, now)?;
    let archived = session_crud::archived_count(state)?;

    let status = RetentionComplianceSection {
        upcoming_deletions: upcoming.len() as u64,
        overdue_deletions: overdue.len() as u64,
        archived_sessions: archived,
        compliance_status: if overdue.is_empty() {
            "compliant".to_string()
        } else {
            "non_compliant".to_string()
        },
    };
    upcoming.truncate(ACTION_PREVIEW_LIMIT);
    overdue.truncate(ACTION_PREVIEW_LIMIT);
    Ok(RetentionStatusResponse {
        retention_compliance: status,
        upcoming_actions: upcoming,
        overdue_actions: overdue,
    })
}

pub async fn cleanup(state: &AppState, dry_run: bool) -> Result<CleanupResponse, AppError> {
    let report = session_crud::sweep_expired(state, dry_run).await?;
    if !dry_run {
        metrics_service::inc_sweeps_completed();
        metrics_service::add_sessions_deleted(report.sessions_deleted);
        info!(
            deleted = report.sessions_deleted,
            entries = report.entries_deleted,
            failures = report.failures.len(),
            "retention cleanup executed"
        );
    }
    let would_delete: u64 = report.candidates.iter().map(|c| c.entries).sum();
    Ok(CleanupResponse {
        dry_run,
        would_delete,
        candidates: report.candidates,
        deleted_count: report.sessions_deleted,
        entries_deleted: report.entries_deleted,
        failures: report.failures,
    })
}

pub fn verify_integrity(
    state: &AppState,
    start: Option<i64>,
    end: Option<i64>,
    session_id: Option<&str>,
) -> Result<IntegrityResponse, AppError> {
    let report = session_crud::verify_range(state, start, end, session_id)?;
    if !report.chain_intact {
        metrics_service::set_last_error_ts(session_crud::now_unix());
    }
    Ok(IntegrityResponse {
        integrity_verification: report,
        verification_period: VerificationPeriod {
            start_date: start,
            end_date: end,
        },
    })
}
