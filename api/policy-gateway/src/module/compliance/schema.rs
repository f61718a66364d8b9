use serde::{Deserialize, Serialize};

use crate::module::session::crud::{IntegrityReport, SweepCandidate};
use crate::module::session::model::LogEntryRecord;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportQuery {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub report_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportRequest {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub report_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: i64,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub report_type: String,
    pub policy_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSection {
    pub total_tool_calls: u64,
    pub allowed_calls: u64,
    pub denied_calls: u64,
    pub approval_required: u64,
    pub unique_agents: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    pub policy_violations: u64,
    pub violation_rate: f64,
    pub pending_outcomes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSection {
    pub archived_sessions: u64,
    pub upcoming_deletions: u64,
    pub overdue_deletions: u64,
    pub retention_policy_compliant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub report_metadata: ReportMetadata,
    pub usage: UsageSection,
    pub risk_assessment: RiskSection,
    pub retention: RetentionSection,
    pub integrity: IntegrityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_entries: Option<Vec<LogEntryRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionComplianceSection {
    pub upcoming_deletions: u64,
    pub overdue_deletions: u64,
    pub archived_sessions: u64,
    pub compliance_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionStatusResponse {
    pub retention_compliance: RetentionComplianceSection,
    pub upcoming_actions: Vec<SweepCandidate>,
    pub overdue_actions: Vec<SweepCandidate>,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub dry_run: bool,
    pub would_delete: u64,
    pub candidates: Vec<SweepCandidate>,
    pub deleted_count: u64,
    pub entries_deleted: u64,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrityQuery {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPeriod {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityResponse {
    pub integrity_verification: IntegrityReport,
    pub verification_period: VerificationPeriod,
}
