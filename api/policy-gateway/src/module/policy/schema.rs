use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::session::model::Action;
use crate::service::policy_engine_service::Decision;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInfoResponse {
    pub version: String,
    pub hash: String,
    pub description: Option<String>,
    pub rules_count: usize,
    pub rules: Vec<Value>,
    pub created_at: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatePolicyRequest {
    pub policy_content: String,
    pub description: Option<String>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatePolicyResponse {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rules_count: usize,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatePolicyRequest {
    pub policy_content: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicyResponse {
    pub success: bool,
    pub policy_id: String,
    pub version: String,
    pub fingerprint: String,
    pub activated: bool,
    pub message: String,
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadPolicyResponse {
    pub status: String,
    pub old_version: String,
    pub new_version: String,
    pub rules_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyTestQuery {
    pub tool_name: String,
    pub tool_args: Option<String>,
    pub session_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    pub action: Action,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
}

impl From<Decision> for DecisionView {
    fn from(decision: Decision) -> Self {
        Self {
            action: decision.action,
            rule_name: decision.rule_name,
            reason: decision.reason,
            policy_version: decision.policy_version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTestResponse {
    pub tool_name: String,
    pub tool_args: Value,
    pub session_context: Value,
    pub decision: DecisionView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersionListItem {
    pub policy_id: String,
    pub version: String,
    pub fingerprint: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub active: bool,
}
