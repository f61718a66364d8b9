//! HTTP client for the policy gateway.
//!
//! Thin request/response wrapper over the `/api/v1` surface. Denials and
//! approval requirements are ordinary decisions here; turning them into
//! exit codes is the command layer's business.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::TameConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to reach the Tame API at {url}: {source}")]
    Connection { url: String, source: reqwest::Error },
    #[error("authentication failed: {0}")]
    Unauthenticated(String),
    #[error("API error {status}: {reason}")]
    Api { status: u16, reason: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnforcementDecision {
    pub session_id: String,
    pub decision: String,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
    pub log_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub bypass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInfo {
    pub version: String,
    pub hash: String,
    pub description: Option<String>,
    pub rules_count: usize,
    pub rules: Vec<Value>,
    pub created_at: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub policy_version: String,
    pub rules_count: usize,
    pub auth_enabled: bool,
    pub bypass_mode: bool,
    pub metrics: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub log_id: String,
    pub seq_index: u64,
    pub timestamp: i64,
    pub tool_name: String,
    pub decision: String,
    pub rule_name: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEntries {
    pub session_id: String,
    pub entries: Vec<LogEntry>,
    pub total_count: u64,
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: TameConfig,
    pub session_id: String,
}

impl Client {
    pub fn new(config: TameConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| ClientError::Invalid(format!("client build failed: {e}")))?;
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Ok(Self {
            http,
            config,
            session_id,
        })
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.config.agent_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.config.user_id.as_deref()
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub async fn enforce(
        &self,
        tool_name: &str,
        tool_args: Value,
        metadata: Option<Value>,
        session_id: Option<&str>,
        agent_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<EnforcementDecision, ClientError> {
        // Client-side bypass: no server round-trip, nothing audited.
        if self.config.bypass_mode {
            return Ok(EnforcementDecision {
                session_id: session_id.unwrap_or(&self.session_id).to_string(),
                decision: "allow".to_string(),
                rule_name: Some("bypass_mode".to_string()),
                reason: "Policy enforcement bypassed by the client".to_string(),
                policy_version: "bypass".to_string(),
                log_id: format!("bypass-{}", Uuid::new_v4().simple()),
                timestamp: Utc::now().timestamp(),
                bypass: true,
            });
        }

        let body = serde_json::json!({
            "tool_name": tool_name,
            "tool_args": tool_args,
            "session_id": session_id.unwrap_or(&self.session_id),
            "agent_id": agent_id.or(self.config.agent_id.as_deref()),
            "user_id": user_id.or(self.config.user_id.as_deref()),
            "metadata": metadata,
        });
        self.post_json("/api/v1/enforce", &body).await
    }

    pub async fn update_result(
        &self,
        session_id: &str,
        log_id: &str,
        status: &str,
        result: Option<Value>,
        error_message: Option<String>,
        execution_duration_ms: Option<f64>,
    ) -> Result<Value, ClientError> {
        let path = format!("/api/v1/enforce/{session_id}/result?log_id={log_id}");
        let body = serde_json::json!({
            "status": status,
            "result": result,
            "error_message": error_message,
            "execution_duration_ms": execution_duration_ms,
        });
        self.post_json(&path, &body).await
    }

    pub async fn test_policy(&self, tool_name: &str, tool_args: &Value) -> Result<Value, ClientError> {
        let args = serde_json::to_string(tool_args)
            .map_err(|e| ClientError::Invalid(format!("tool_args encode failed: {e}")))?;
        let path = format!(
            "/api/v1/policy/test?tool_name={}&tool_args={}",
            urlencode(tool_name),
            urlencode(&args)
        );
        self.get_json(&path).await
    }

    pub async fn policy_info(&self) -> Result<PolicyInfo, ClientError> {
        self.get_json("/api/v1/policy/current").await
    }

    pub async fn server_status(&self) -> Result<ServerStatus, ClientError> {
        self.get_json("/api/v1/status").await
    }

    pub async fn session_entries(&self, session_id: &str) -> Result<SessionEntries, ClientError> {
        self.get_json(&format!("/api/v1/sessions/{session_id}?page_size=100"))
            .await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|source| ClientError::Connection {
            url: url.clone(),
            source,
        })?;
        Self::decode(response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|source| ClientError::Connection {
            url: url.clone(),
            source,
        })?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Invalid(format!("response read failed: {e}")))?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ClientError::Invalid(format!("response parse failed: {e}")));
        }

        let reason = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        if status.as_u16() == 401 {
            return Err(ClientError::Unauthenticated(reason));
        }
        Err(ClientError::Api {
            status: status.as_u16(),
            reason,
        })
    }
}

pub fn urlencode(raw: &str) -> String {
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
