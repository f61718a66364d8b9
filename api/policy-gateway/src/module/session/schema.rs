use serde::{Deserialize, Serialize};

use super::model::{LogEntryRecord, SessionSummary};

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEntriesQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntriesResponse {
    pub session_id: String,
    pub entries: Vec<LogEntryRecord>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub status: String,
    pub session_id: String,
    pub logs_deleted: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveSessionRequest {
    pub retention_days: i64,
    pub archived_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkArchiveRequest {
    pub session_ids: Vec<String>,
    pub retention_days: i64,
    pub archived_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub archived: Vec<String>,
    pub missing: Vec<String>,
    pub retention_until: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_format")]
    pub format: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

fn default_export_format() -> String {
    "json".to_string()
}
