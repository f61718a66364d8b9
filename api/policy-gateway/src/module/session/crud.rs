//! Audit store: sessions and their hash-chained log entries.
//!
//! The in-memory store is authoritative; MongoDB, when configured, is a
//! write-through replica warmed once at startup. Appends run under the
//! store mutex, which serializes per-session index assignment and chain
//! extension. The critical section covers only map access and one HMAC.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Collection;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::model::{Action, LogEntryRecord, OutcomeStatus, SessionRecord, SessionSummary};
use crate::app::AppState;
use crate::errors::AppError;
use crate::infra::{InfraClients, LOG_ENTRIES_COLLECTION, SESSIONS_COLLECTION};
use crate::service::chain_service::{self, ChainViolation};

#[derive(Debug, Default)]
pub struct AuditStore {
    inner: Mutex<AuditInner>,
}

#[derive(Debug, Default)]
struct AuditInner {
    sessions: HashMap<String, SessionRecord>,
    entries: HashMap<String, Vec<LogEntryRecord>>,
}

/// Decision fields of a new entry, frozen at append time.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub session_metadata: Option<Value>,
    pub tool_name: String,
    pub tool_args: Value,
    pub policy_version: String,
    pub decision: Action,
    pub rule_name: Option<String>,
    pub reason: String,
    pub bypass: bool,
}

#[derive(Debug, Clone)]
pub struct OutcomeUpdate {
    pub status: OutcomeStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub include_archived: bool,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SweepCandidate {
    pub session_id: String,
    pub retention_until: i64,
    pub days_overdue: i64,
    pub entries: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SweepReport {
    pub candidates: Vec<SweepCandidate>,
    pub sessions_deleted: u64,
    pub entries_deleted: u64,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IntegrityReport {
    pub entries_checked: u64,
    pub integrity_violations: u64,
    pub chain_intact: bool,
    pub violations: Vec<ChainViolation>,
}

/// Append a decision entry, creating the session on first reference.
///
/// Returns the sealed-at-creation record, including its chain hashes. On a
/// persistence failure the in-memory write is rolled back so the entry is
/// never visible.
pub async fn append_decision(state: &AppState, new: NewEntry) -> Result<LogEntryRecord, AppError> {
    let now = now_unix();
    let (entry, session) = {
        let mut inner = lock_store(&state.audit)?;

        let session_id = match &new.session_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => generate_session_id(),
        };

        let session = inner
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionRecord {
                session_id: session_id.clone(),
                created_at: now,
                last_seen_at: now,
                agent_id: new.agent_id.clone(),
                user_id: new.user_id.clone(),
                metadata: new.session_metadata.clone(),
                archived: false,
                archived_at: None,
                archived_by: None,
                retention_until: None,
            });
        session.last_seen_at = now;
        if session.agent_id.is_none() {
            session.agent_id = new.agent_id.clone();
        }
        if session.user_id.is_none() {
            session.user_id = new.user_id.clone();
        }
        let session = session.clone();

        let chain = inner.entries.entry(session_id.clone()).or_default();
        let (seq_index, prev_hash) = match chain.last() {
            Some(last) => (last.seq_index + 1, last.own_hash.clone()),
            None => (1, chain_service::GENESIS_HASH.to_string()),
        };

        let mut entry = LogEntryRecord {
            log_id: Uuid::new_v4().simple().to_string(),
            session_id,
            seq_index,
            timestamp: now,
            tool_name: new.tool_name,
            tool_args: new.tool_args,
            policy_version: new.policy_version,
            decision: new.decision,
            rule_name: new.rule_name,
            reason: new.reason,
            status: OutcomeStatus::Pending,
            result: None,
            error_message: None,
            duration_ms: None,
            bypass: new.bypass,
            prev_hash,
            own_hash: String::new(),
        };
        entry.own_hash = chain_service::entry_hash(&state.config.audit_hmac_secret, &entry)
            .map_err(|e| AppError::internal("CHAIN_HASH_ERROR", e))?;
        chain.push(entry.clone());
        (entry, session)
    };

    if let Some(infra) = &state.infra {
        if let Err(e) = persist_append(infra, &session, &entry).await {
            let mut inner = lock_store(&state.audit)?;
            if let Some(chain) = inner.entries.get_mut(&entry.session_id) {
                chain.retain(|e| e.log_id != entry.log_id);
            }
            return Err(e);
        }
    }

    Ok(entry)
}

/// Seal the outcome of a pending entry. The outcome is the single mutable
/// region of an entry and transitions exactly once.
pub async fn seal_outcome(
    state: &AppState,
    session_id: &str,
    log_id: &str,
    update: OutcomeUpdate,
) -> Result<LogEntryRecord, AppError> {
    if update.status == OutcomeStatus::Pending {
        return Err(AppError::bad_request(
            "VALIDATION",
            "outcome status must be 'success' or 'error'",
        ));
    }

    let entry = {
        let mut inner = lock_store(&state.audit)?;
        let owning_session = inner
            .entries
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| e.log_id == log_id))
            .map(|(sid, _)| sid.clone());
        let Some(owning_session) = owning_session else {
            return Err(AppError::not_found("LOG_ENTRY_NOT_FOUND", "log entry not found"));
        };
        if owning_session != session_id {
            return Err(AppError::bad_request(
                "SESSION_MISMATCH",
                "log_id does not belong to the given session",
            ));
        }

        let Some(entry) = inner
            .entries
            .get_mut(&owning_session)
            .and_then(|entries| entries.iter_mut().find(|e| e.log_id == log_id))
        else {
            return Err(AppError::internal("STORE_INCONSISTENT", "entry vanished under its session"));
        };
        if entry.status != OutcomeStatus::Pending {
            return Err(AppError::conflict(
                "OUTCOME_ALREADY_SEALED",
                format!("outcome already sealed as '{}'", entry.status.as_str()),
            ));
        }
        entry.status = update.status;
        entry.result = update.result;
        entry.error_message = update.error_message;
        entry.duration_ms = update.duration_ms;
        entry.clone()
    };

    if let Some(infra) = &state.infra {
        persist_entry_replace(infra, &entry).await?;
    }
    Ok(entry)
}

pub fn get_session(state: &AppState, session_id: &str) -> Result<SessionRecord, AppError> {
    let inner = lock_store(&state.audit)?;
    inner
        .sessions
        .get(session_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("SESSION_NOT_FOUND", "session not found"))
}

/// Entries of one session ordered by index ascending, paginated.
pub fn session_entries(
    state: &AppState,
    session_id: &str,
    page: u64,
    page_size: u64,
) -> Result<(Vec<LogEntryRecord>, u64), AppError> {
    let inner = lock_store(&state.audit)?;
    if !inner.sessions.contains_key(session_id) {
        return Err(AppError::not_found("SESSION_NOT_FOUND", "session not found"));
    }
    let entries = inner.entries.get(session_id).cloned().unwrap_or_default();
    let total = entries.len() as u64;
    let offset = (page.saturating_sub(1) * page_size) as usize;
    let slice = entries
        .into_iter()
        .skip(offset)
        .take(page_size as usize)
        .collect();
    Ok((slice, total))
}

pub fn list_sessions(
    state: &AppState,
    filter: &SessionFilter,
    page: u64,
    page_size: u64,
) -> Result<(Vec<SessionSummary>, u64), AppError> {
    let inner = lock_store(&state.audit)?;
    let mut summaries: Vec<SessionSummary> = inner
        .sessions
        .values()
        .filter(|s| session_passes(s, filter, &inner))
        .map(|s| summarize(s, inner.entries.get(&s.session_id)))
        .collect();
    summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(a.session_id.cmp(&b.session_id)));

    let total = summaries.len() as u64;
    let offset = (page.saturating_sub(1) * page_size) as usize;
    let slice = summaries
        .into_iter()
        .skip(offset)
        .take(page_size as usize)
        .collect();
    Ok((slice, total))
}

pub fn session_summary(state: &AppState, session_id: &str) -> Result<SessionSummary, AppError> {
    let inner = lock_store(&state.audit)?;
    let session = inner
        .sessions
        .get(session_id)
        .ok_or_else(|| AppError::not_found("SESSION_NOT_FOUND", "session not found"))?;
    Ok(summarize(session, inner.entries.get(session_id)))
}

pub async fn delete_session(state: &AppState, session_id: &str) -> Result<u64, AppError> {
    let removed = {
        let mut inner = lock_store(&state.audit)?;
        if !inner.sessions.contains_key(session_id) {
            return Err(AppError::not_found("SESSION_NOT_FOUND", "session not found"));
        }
        inner.sessions.remove(session_id);
        inner.entries.remove(session_id).map(|e| e.len() as u64).unwrap_or(0)
    };

    if let Some(infra) = &state.infra {
        delete_session_docs(infra, session_id).await?;
    }
    Ok(removed)
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ArchiveReport {
    pub archived: Vec<String>,
    pub missing: Vec<String>,
    pub retention_until: i64,
}

pub async fn archive_sessions(
    state: &AppState,
    session_ids: &[String],
    retention_days: i64,
    archived_by: Option<String>,
) -> Result<ArchiveReport, AppError> {
    let now = now_unix();
    let retention_until = now + retention_days.max(0) * 86_400;
    let mut report = ArchiveReport {
        retention_until,
        ..ArchiveReport::default()
    };

    let mut updated = Vec::new();
    {
        let mut inner = lock_store(&state.audit)?;
        for session_id in session_ids {
            match inner.sessions.get_mut(session_id) {
                Some(session) => {
                    session.archived = true;
                    session.archived_at = Some(now);
                    session.archived_by = archived_by.clone();
                    session.retention_until = Some(retention_until);
                    updated.push(session.clone());
                    report.archived.push(session_id.clone());
                }
                None => report.missing.push(session_id.clone()),
            }
        }
    }

    if let Some(infra) = &state.infra {
        for session in &updated {
            persist_session_replace(infra, session).await?;
        }
    }
    Ok(report)
}

/// Sessions past their retention window; oldest first.
pub fn retention_candidates(state: &AppState, now: i64) -> Result<Vec<SweepCandidate>, AppError> {
    let inner = lock_store(&state.audit)?;
    let mut candidates: Vec<SweepCandidate> = inner
        .sessions
        .values()
        .filter_map(|s| {
            let retention_until = s.retention_until?;
            if retention_until > now {
                return None;
            }
            Some(SweepCandidate {
                session_id: s.session_id.clone(),
                retention_until,
                days_overdue: (now - retention_until) / 86_400,
                entries: inner
                    .entries
                    .get(&s.session_id)
                    .map(|e| e.len() as u64)
                    .unwrap_or(0),
            })
        })
        .collect();
    candidates.sort_by_key(|c| c.retention_until);
    Ok(candidates)
}

/// Sessions approaching their retention window within `horizon_days`.
pub fn retention_upcoming(
    state: &AppState,
    now: i64,
    horizon_days: i64,
) -> Result<Vec<SweepCandidate>, AppError> {
    let horizon = now + horizon_days * 86_400;
    let inner = lock_store(&state.audit)?;
    let mut upcoming: Vec<SweepCandidate> = inner
        .sessions
        .values()
        .filter_map(|s| {
            let retention_until = s.retention_until?;
            if retention_until <= now || retention_until > horizon {
                return None;
            }
            Some(SweepCandidate {
                session_id: s.session_id.clone(),
                retention_until,
                days_overdue: 0,
                entries: inner
                    .entries
                    .get(&s.session_id)
                    .map(|e| e.len() as u64)
                    .unwrap_or(0),
            })
        })
        .collect();
    upcoming.sort_by_key(|c| c.retention_until);
    Ok(upcoming)
}

pub fn archived_count(state: &AppState) -> Result<u64, AppError> {
    let inner = lock_store(&state.audit)?;
    Ok(inner.sessions.values().filter(|s| s.archived).count() as u64)
}

/// Delete expired sessions. One failed session never aborts the sweep; the
/// failure is recorded and the sweeper moves on.
pub async fn sweep_expired(state: &AppState, dry_run: bool) -> Result<SweepReport, AppError> {
    let now = now_unix();
    let candidates = retention_candidates(state, now)?;
    let mut report = SweepReport {
        candidates: candidates.clone(),
        ..SweepReport::default()
    };
    if dry_run {
        return Ok(report);
    }

    for candidate in candidates {
        if let Some(infra) = &state.infra {
            if let Err(e) = delete_session_docs(infra, &candidate.session_id).await {
                warn!(
                    session_id = %candidate.session_id,
                    error_code = e.code,
                    reason = %e.message,
                    "retention delete failed; session skipped"
                );
                report
                    .failures
                    .push(format!("{}: {}", candidate.session_id, e.message));
                continue;
            }
        }
        let mut inner = lock_store(&state.audit)?;
        inner.sessions.remove(&candidate.session_id);
        inner.entries.remove(&candidate.session_id);
        report.sessions_deleted += 1;
        report.entries_deleted += candidate.entries;
    }
    Ok(report)
}

/// Recompute the chain over every entry in `[start, end]`, grouped per
/// session. Read-only; violations are reported, never remediated.
pub fn verify_range(
    state: &AppState,
    start: Option<i64>,
    end: Option<i64>,
    session_id: Option<&str>,
) -> Result<IntegrityReport, AppError> {
    let inner = lock_store(&state.audit)?;
    let mut entries_checked = 0u64;
    let mut violations = Vec::new();

    let mut session_ids: Vec<&String> = inner
        .entries
        .keys()
        .filter(|sid| session_id.is_none_or(|wanted| wanted == sid.as_str()))
        .collect();
    session_ids.sort();

    for sid in session_ids {
        let chain: Vec<LogEntryRecord> = inner.entries[sid]
            .iter()
            .filter(|e| {
                start.is_none_or(|s| e.timestamp >= s) && end.is_none_or(|t| e.timestamp <= t)
            })
            .cloned()
            .collect();
        entries_checked += chain.len() as u64;
        violations.extend(
            chain_service::verify_session_chain(&state.config.audit_hmac_secret, &chain)
                .map_err(|e| AppError::internal("CHAIN_HASH_ERROR", e))?,
        );
    }

    Ok(IntegrityReport {
        entries_checked,
        integrity_violations: violations.len() as u64,
        chain_intact: violations.is_empty(),
        violations,
    })
}

/// All entries matching the filter, ordered by session id then index —
/// the canonical export ordering.
pub fn export_entries(
    state: &AppState,
    filter: &SessionFilter,
    session_id: Option<&str>,
) -> Result<Vec<LogEntryRecord>, AppError> {
    let inner = lock_store(&state.audit)?;
    let mut session_ids: Vec<String> = inner
        .sessions
        .values()
        .filter(|s| {
            session_id.is_none_or(|wanted| wanted == s.session_id)
                && session_passes(s, filter, &inner)
        })
        .map(|s| s.session_id.clone())
        .collect();
    session_ids.sort();

    let mut out = Vec::new();
    for sid in session_ids {
        if let Some(entries) = inner.entries.get(&sid) {
            out.extend(entries.iter().filter(|e| {
                filter.start.is_none_or(|s| e.timestamp >= s)
                    && filter.end.is_none_or(|t| e.timestamp <= t)
            }).cloned());
        }
    }
    Ok(out)
}

/// Counters over a time range for the compliance report.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RangeStats {
    pub total_calls: u64,
    pub allowed_calls: u64,
    pub denied_calls: u64,
    pub approval_required: u64,
    pub unique_agents: u64,
    pub unique_users: u64,
    pub archived_sessions: u64,
    pub pending_outcomes: u64,
}

pub fn range_stats(state: &AppState, start: Option<i64>, end: Option<i64>) -> Result<RangeStats, AppError> {
    let inner = lock_store(&state.audit)?;
    let mut stats = RangeStats::default();
    let mut agents = std::collections::HashSet::new();
    let mut users = std::collections::HashSet::new();

    for (sid, entries) in &inner.entries {
        let session = inner.sessions.get(sid);
        let mut any_in_range = false;
        for entry in entries {
            if start.is_some_and(|s| entry.timestamp < s) || end.is_some_and(|t| entry.timestamp > t) {
                continue;
            }
            any_in_range = true;
            stats.total_calls += 1;
            match entry.decision {
                Action::Allow => stats.allowed_calls += 1,
                Action::Deny => stats.denied_calls += 1,
                Action::Approve => stats.approval_required += 1,
            }
            if entry.status == OutcomeStatus::Pending {
                stats.pending_outcomes += 1;
            }
        }
        if any_in_range {
            if let Some(session) = session {
                if session.archived {
                    stats.archived_sessions += 1;
                }
                if let Some(agent) = &session.agent_id {
                    agents.insert(agent.clone());
                }
                if let Some(user) = &session.user_id {
                    users.insert(user.clone());
                }
            }
        }
    }
    stats.unique_agents = agents.len() as u64;
    stats.unique_users = users.len() as u64;
    Ok(stats)
}

/// Warm the in-memory store from Mongo at startup.
pub async fn warm_from_storage(state: &AppState) -> Result<(), AppError> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };

    let sessions_coll: Collection<SessionRecord> = infra.mongo_db.collection(SESSIONS_COLLECTION);
    let mut cursor = sessions_coll
        .find(doc! {})
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("session scan failed: {e}")))?;
    let mut sessions = Vec::new();
    while let Some(session) = cursor
        .try_next()
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("session scan failed: {e}")))?
    {
        sessions.push(session);
    }

    let entries_coll: Collection<LogEntryRecord> = infra.mongo_db.collection(LOG_ENTRIES_COLLECTION);
    let mut cursor = entries_coll
        .find(doc! {})
        .sort(doc! { "session_id": 1, "seq_index": 1 })
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("entry scan failed: {e}")))?;
    let mut entries: HashMap<String, Vec<LogEntryRecord>> = HashMap::new();
    while let Some(entry) = cursor
        .try_next()
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("entry scan failed: {e}")))?
    {
        entries.entry(entry.session_id.clone()).or_default().push(entry);
    }

    let mut inner = lock_store(&state.audit)?;
    for session in sessions {
        inner.sessions.insert(session.session_id.clone(), session);
    }
    inner.entries.extend(entries);
    Ok(())
}

fn session_passes(session: &SessionRecord, filter: &SessionFilter, inner: &AuditInner) -> bool {
    if !filter.include_archived && session.archived {
        return false;
    }
    if filter
        .agent_id
        .as_deref()
        .is_some_and(|a| session.agent_id.as_deref() != Some(a))
    {
        return false;
    }
    if filter
        .user_id
        .as_deref()
        .is_some_and(|u| session.user_id.as_deref() != Some(u))
    {
        return false;
    }
    if filter.start.is_some() || filter.end.is_some() {
        let (first, last) = match inner.entries.get(&session.session_id) {
            Some(entries) if !entries.is_empty() => (
                entries.first().map(|e| e.timestamp).unwrap_or(session.created_at),
                entries.last().map(|e| e.timestamp).unwrap_or(session.last_seen_at),
            ),
            _ => (session.created_at, session.last_seen_at),
        };
        if filter.start.is_some_and(|s| last < s) || filter.end.is_some_and(|e| first > e) {
            return false;
        }
    }
    true
}

fn summarize(session: &SessionRecord, entries: Option<&Vec<LogEntryRecord>>) -> SessionSummary {
    let empty = Vec::new();
    let entries = entries.unwrap_or(&empty);
    let start_time = entries
        .first()
        .map(|e| e.timestamp)
        .unwrap_or(session.created_at);
    let end_time = entries
        .last()
        .map(|e| e.timestamp)
        .filter(|t| *t != start_time);
    SessionSummary {
        session_id: session.session_id.clone(),
        start_time,
        end_time,
        total_calls: entries.len() as u64,
        allowed_calls: entries.iter().filter(|e| e.decision == Action::Allow).count() as u64,
        denied_calls: entries.iter().filter(|e| e.decision == Action::Deny).count() as u64,
        approved_calls: entries.iter().filter(|e| e.decision == Action::Approve).count() as u64,
        agent_id: session.agent_id.clone(),
        user_id: session.user_id.clone(),
        archived: session.archived,
        retention_until: session.retention_until,
    }
}

/// Collision-resistant caller-facing identifier: uuid v4 rendered as hex.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn persist_append(
    infra: &InfraClients,
    session: &SessionRecord,
    entry: &LogEntryRecord,
) -> Result<(), AppError> {
    persist_session_replace(infra, session).await?;
    let coll: Collection<LogEntryRecord> = infra.mongo_db.collection(LOG_ENTRIES_COLLECTION);
    coll.insert_one(entry)
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("insert entry failed: {e}")))?;
    Ok(())
}

async fn persist_entry_replace(infra: &InfraClients, entry: &LogEntryRecord) -> Result<(), AppError> {
    let coll: Collection<LogEntryRecord> = infra.mongo_db.collection(LOG_ENTRIES_COLLECTION);
    coll.replace_one(doc! { "log_id": &entry.log_id }, entry)
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("update entry failed: {e}")))?;
    Ok(())
}

async fn persist_session_replace(infra: &InfraClients, session: &SessionRecord) -> Result<(), AppError> {
    let coll: Collection<SessionRecord> = infra.mongo_db.collection(SESSIONS_COLLECTION);
    coll.replace_one(doc! { "session_id": &session.session_id }, session)
        .upsert(true)
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("upsert session failed: {e}")))?;
    Ok(())
}

async fn delete_session_docs(infra: &InfraClients, session_id: &str) -> Result<(), AppError> {
    let entries: Collection<LogEntryRecord> = infra.mongo_db.collection(LOG_ENTRIES_COLLECTION);
    entries
        .delete_many(doc! { "session_id": session_id })
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("delete entries failed: {e}")))?;
    let sessions: Collection<SessionRecord> = infra.mongo_db.collection(SESSIONS_COLLECTION);
    sessions
        .delete_one(doc! { "session_id": session_id })
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("delete session failed: {e}")))?;
    Ok(())
}

fn lock_store(store: &AuditStore) -> Result<MutexGuard<'_, AuditInner>, AppError> {
    store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "audit store lock poisoned"))
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;
    use crate::config::environment::AppConfig;
    use serde_json::json;

    fn test_state() -> AppState {
        AppState::new(
            AppConfig {
                rust_env: "test".to_string(),
                api_host: "127.0.0.1".to_string(),
                api_port: 0,
                audit_hmac_secret: "test-chain-secret".to_string(),
                api_key: None,
                bypass_mode: false,
                policy_file: None,
                mongodb_url: None,
                mongodb_database: None,
                redis_url: None,
                request_timeout_seconds: 30,
                sweeper_enabled: false,
                sweeper_interval_seconds: 3600,
                event_buffer_size: 16,
            },
            None,
        )
    }

    fn new_entry(session_id: &str, tool_name: &str) -> NewEntry {
        NewEntry {
            session_id: Some(session_id.to_string()),
            agent_id: Some("agent-1".to_string()),
            user_id: None,
            session_metadata: None,
            tool_name: tool_name.to_string(),
            tool_args: json!({"path": "/tmp/a"}),
            policy_version: "v1".to_string(),
            decision: Action::Allow,
            rule_name: Some("allow_reads".to_string()),
            reason: "Matched rule 'allow_reads'".to_string(),
            bypass: false,
        }
    }

    #[tokio::test]
    async fn appends_produce_contiguous_chained_indices() {
        let state = test_state();
        let first = append_decision(&state, new_entry("s1", "read_file")).await.unwrap();
        let second = append_decision(&state, new_entry("s1", "list_dir")).await.unwrap();
        let third = append_decision(&state, new_entry("s1", "read_file")).await.unwrap();

        assert_eq!(first.seq_index, 1);
        assert_eq!(second.seq_index, 2);
        assert_eq!(third.seq_index, 3);
        assert_eq!(first.prev_hash, chain_service::GENESIS_HASH);
        assert_eq!(second.prev_hash, first.own_hash);
        assert_eq!(third.prev_hash, second.own_hash);

        let report = verify_range(&state, None, None, Some("s1")).unwrap();
        assert!(report.chain_intact);
        assert_eq!(report.entries_checked, 3);
    }

    #[tokio::test]
    async fn sessions_are_independent_chains() {
        let state = test_state();
        append_decision(&state, new_entry("s1", "read_file")).await.unwrap();
        let other = append_decision(&state, new_entry("s2", "read_file")).await.unwrap();
        assert_eq!(other.seq_index, 1);
        assert_eq!(other.prev_hash, chain_service::GENESIS_HASH);
    }

    #[tokio::test]
    async fn outcome_seals_exactly_once() {
        let state = test_state();
        let entry = append_decision(&state, new_entry("s1", "read_file")).await.unwrap();
        assert_eq!(entry.status, OutcomeStatus::Pending);

        let sealed = seal_outcome(
            &state,
            "s1",
            &entry.log_id,
            OutcomeUpdate {
                status: OutcomeStatus::Success,
                result: Some(json!({"bytes": 42})),
                error_message: None,
                duration_ms: Some(3.5),
            },
        )
        .await
        .unwrap();
        assert_eq!(sealed.status, OutcomeStatus::Success);
        // Sealing leaves the chain untouched.
        assert!(verify_range(&state, None, None, Some("s1")).unwrap().chain_intact);

        let again = seal_outcome(
            &state,
            "s1",
            &entry.log_id,
            OutcomeUpdate {
                status: OutcomeStatus::Error,
                result: None,
                error_message: Some("late".to_string()),
                duration_ms: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(again.code, "OUTCOME_ALREADY_SEALED");
        assert_eq!(again.status, axum::http::StatusCode::CONFLICT);

        // The stored outcome still reflects the first seal.
        let (entries, _) = session_entries(&state, "s1", 1, 50).unwrap();
        assert_eq!(entries[0].result, Some(json!({"bytes": 42})));
    }

    #[tokio::test]
    async fn cross_session_seal_is_rejected() {
        let state = test_state();
        let entry = append_decision(&state, new_entry("s1", "read_file")).await.unwrap();
        append_decision(&state, new_entry("s2", "read_file")).await.unwrap();

        let err = seal_outcome(
            &state,
            "s2",
            &entry.log_id,
            OutcomeUpdate {
                status: OutcomeStatus::Success,
                result: None,
                error_message: None,
                duration_ms: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "SESSION_MISMATCH");
    }

    #[tokio::test]
    async fn tampered_entry_is_flagged_with_its_successor() {
        let state = test_state();
        for _ in 0..3 {
            append_decision(&state, new_entry("s5", "read_file")).await.unwrap();
        }

        // Corrupt entry 2's arguments behind the store's back, then
        // recompute nothing: both its hash and entry 3's linkage must fail.
        {
            let mut inner = state.audit.inner.lock().unwrap();
            let chain = inner.entries.get_mut("s5").unwrap();
            chain[1].tool_args = json!({"path": "/etc/shadow"});
        }

        let report = verify_range(&state, None, None, Some("s5")).unwrap();
        assert!(!report.chain_intact);
        assert!(report.integrity_violations >= 1);
        assert!(report
            .violations
            .iter()
            .any(|v| v.seq_index == 2 && v.kind == "hash_mismatch"));
    }

    #[tokio::test]
    async fn archive_then_sweep_deletes_expired_sessions() {
        let state = test_state();
        append_decision(&state, new_entry("s6", "read_file")).await.unwrap();
        append_decision(&state, new_entry("s6", "read_file")).await.unwrap();
        append_decision(&state, new_entry("keep", "read_file")).await.unwrap();

        let report = archive_sessions(&state, &["s6".to_string()], 0, Some("auditor".to_string()))
            .await
            .unwrap();
        assert_eq!(report.archived, vec!["s6".to_string()]);

        let dry = sweep_expired(&state, true).await.unwrap();
        assert_eq!(dry.candidates.len(), 1);
        assert_eq!(dry.candidates[0].entries, 2);
        assert_eq!(dry.sessions_deleted, 0);
        // Dry run deletes nothing.
        assert!(get_session(&state, "s6").is_ok());

        let wet = sweep_expired(&state, false).await.unwrap();
        assert_eq!(wet.sessions_deleted, 1);
        assert_eq!(wet.entries_deleted, 2);
        assert!(get_session(&state, "s6").is_err());
        assert!(get_session(&state, "keep").is_ok());
    }

    #[tokio::test]
    async fn list_sessions_filters_and_summarizes() {
        let state = test_state();
        let mut entry = new_entry("a1", "read_file");
        entry.agent_id = Some("alpha".to_string());
        append_decision(&state, entry).await.unwrap();

        let mut entry = new_entry("a1", "delete_file");
        entry.agent_id = Some("alpha".to_string());
        entry.decision = Action::Deny;
        append_decision(&state, entry).await.unwrap();

        let mut entry = new_entry("b1", "read_file");
        entry.agent_id = Some("beta".to_string());
        append_decision(&state, entry).await.unwrap();

        let filter = SessionFilter {
            agent_id: Some("alpha".to_string()),
            ..SessionFilter::default()
        };
        let (summaries, total) = list_sessions(&state, &filter, 1, 50).unwrap();
        assert_eq!(total, 1);
        assert_eq!(summaries[0].session_id, "a1");
        assert_eq!(summaries[0].total_calls, 2);
        assert_eq!(summaries[0].allowed_calls, 1);
        assert_eq!(summaries[0].denied_calls, 1);

        // Archived sessions are hidden unless asked for.
        archive_sessions(&state, &["b1".to_string()], 30, None).await.unwrap();
        let (all, _) = list_sessions(&state, &SessionFilter::default(), 1, 50).unwrap();
        assert!(all.iter().all(|s| s.session_id != "b1"));
        let include = SessionFilter {
            include_archived: true,
            ..SessionFilter::default()
        };
        let (all, _) = list_sessions(&state, &include, 1, 50).unwrap();
        assert!(all.iter().any(|s| s.session_id == "b1"));
    }

    #[tokio::test]
    async fn export_orders_by_session_then_index() {
        let state = test_state();
        append_decision(&state, new_entry("zz", "read_file")).await.unwrap();
        append_decision(&state, new_entry("aa", "read_file")).await.unwrap();
        append_decision(&state, new_entry("zz", "read_file")).await.unwrap();

        let entries = export_entries(&state, &SessionFilter::default(), None).unwrap();
        let keys: Vec<(String, u64)> = entries
            .iter()
            .map(|e| (e.session_id.clone(), e.seq_index))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn generated_session_ids_are_hex_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
