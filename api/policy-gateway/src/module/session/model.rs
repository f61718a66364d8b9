use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Policy verdict for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
    Approve,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Approve => "approve",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Success,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Success => "success",
            OutcomeStatus::Error => "error",
        }
    }
}

/// Logical grouping of tool calls. Created on first reference, removed only
/// by the retention sweeper or an explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Option<Value>,
    pub archived: bool,
    pub archived_at: Option<i64>,
    pub archived_by: Option<String>,
    pub retention_until: Option<i64>,
}

/// One row of the audit trail. Decision fields are frozen at append time
/// and committed to the hash chain; the outcome fields transition from
/// their initial values exactly once and stay outside the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryRecord {
    pub log_id: String,
    pub session_id: String,
    pub seq_index: u64,
    pub timestamp: i64,
    pub tool_name: String,
    pub tool_args: Value,
    pub policy_version: String,
    pub decision: Action,
    pub rule_name: Option<String>,
    pub reason: String,
    pub status: OutcomeStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<f64>,
    pub bypass: bool,
    pub prev_hash: String,
    pub own_hash: String,
}

/// Aggregated per-session view used by the listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub total_calls: u64,
    pub allowed_calls: u64,
    pub denied_calls: u64,
    pub approved_calls: u64,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub archived: bool,
    pub retention_until: Option<i64>,
}
