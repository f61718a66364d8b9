use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::session::model::Action;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Option<Value>,
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub session_id: String,
    pub decision: Action,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
    pub log_id: String,
    pub timestamp: i64,
    pub bypass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateResultQuery {
    pub log_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateResultRequest {
    pub status: String,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub execution_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResultResponse {
    pub status: String,
    pub log_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub policy_version: String,
    pub rules_count: usize,
    pub auth_enabled: bool,
    pub bypass_mode: bool,
    pub metrics: crate::service::metrics_service::MetricsSnapshot,
}
