//! Policy version store and lifecycle.
//!
//! Versions are immutable rows guarded by the store mutex; the currently
//! active policy is additionally published as a compiled snapshot behind an
//! `ArcSwap` pointer so enforcement reads are lock-free. Activation swaps
//! the pointer after the row transition commits; evaluations holding the
//! previous snapshot run to completion on the old version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Collection;
use redis::AsyncCommands;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::PolicyVersionRecord;
use super::schema::{CreatePolicyRequest, CreatePolicyResponse, ReloadPolicyResponse};
use crate::app::AppState;
use crate::errors::AppError;
use crate::infra::{InfraClients, ACTIVE_POLICY_CACHE_KEY, POLICY_VERSIONS_COLLECTION};
use crate::service::canonical_json_service::rules_fingerprint;
use crate::service::policy_engine_service::{self, CompiledPolicy};
use crate::service::policy_parser_service::{validate_source, ValidationOutcome};

const DEFAULT_POLICY_SOURCE: &str = r#"version: "default-v1"
description: "Built-in allow-all development policy"
rules:
  - name: "default_allow_all"
    action: allow
    tools: ["*"]
    description: "Development fallback until a real policy is activated"
default_action: allow
default_reason: "Development default allows every call"
"#;

#[derive(Debug, Default)]
pub struct PolicyStore {
    inner: Mutex<PolicyStoreInner>,
    snapshot: ArcSwapOption<CompiledPolicy>,
}

#[derive(Debug, Default)]
struct PolicyStoreInner {
    versions: HashMap<String, PolicyVersionRecord>,
    label_by_id: HashMap<String, String>,
    active_label: Option<String>,
    compiled: HashMap<String, Arc<CompiledPolicy>>,
}

impl PolicyStore {
    /// Lock-free read of the active compiled policy.
    pub fn snapshot(&self) -> Option<Arc<CompiledPolicy>> {
        self.snapshot.load_full()
    }
}

/// Validate a policy source: parse, structural checks, then a trial
/// compilation so predicate expression errors surface here and never at
/// evaluation time. Touches no storage.
pub fn validate_policy(source: &str, strict: bool) -> ValidationOutcome {
    let mut outcome = validate_source(source, strict);
    if let Some(parsed) = &outcome.parsed {
        let fingerprint = match rules_fingerprint(&parsed.canonical_rules) {
            Ok(f) => f,
            Err(e) => {
                outcome.errors.push(e);
                outcome.parsed = None;
                return outcome;
            }
        };
        let label = outcome.version.clone().unwrap_or_default();
        if let Err(mut errors) = policy_engine_service::compile(parsed, &label, &fingerprint) {
            outcome.errors.append(&mut errors);
            outcome.parsed = None;
        }
    }
    outcome
}

/// Create a policy version, optionally activating it in the same store
/// transition. Re-submitting an identical (version, fingerprint) pair is
/// idempotent; the same label with different content is a conflict.
pub async fn create_policy(
    state: &AppState,
    req: CreatePolicyRequest,
) -> Result<CreatePolicyResponse, AppError> {
    if req.version.trim().is_empty() {
        return Err(AppError::bad_request("VALIDATION", "version label is required"));
    }

    let outcome = validate_policy(&req.policy_content, false);
    if !outcome.is_valid() {
        return Ok(CreatePolicyResponse {
            success: false,
            policy_id: String::new(),
            version: req.version,
            fingerprint: String::new(),
            activated: false,
            message: "policy validation failed".to_string(),
            validation_errors: outcome.errors,
        });
    }
    let Some(parsed) = outcome.parsed else {
        return Err(AppError::internal("VALIDATION_INCONSISTENT", "valid outcome without parsed policy"));
    };
    let fingerprint = rules_fingerprint(&parsed.canonical_rules)?;
    let compiled = policy_engine_service::compile(&parsed, &req.version, &fingerprint)
        .map_err(|errors| AppError::internal("COMPILE_ERROR", errors.join("; ")))?;

    let (record, previous_active, activated) = {
        let mut inner = lock_store(&state.policies)?;
        if let Some(existing) = inner.versions.get(&req.version) {
            if existing.fingerprint == fingerprint {
                return Ok(CreatePolicyResponse {
                    success: true,
                    policy_id: existing.policy_id.clone(),
                    version: existing.version.clone(),
                    fingerprint: existing.fingerprint.clone(),
                    activated: existing.active,
                    message: "policy version already exists".to_string(),
                    validation_errors: Vec::new(),
                });
            }
            return Err(AppError::conflict(
                "VERSION_CONFLICT",
                "version label already exists with different content",
            ));
        }

        let record = PolicyVersionRecord {
            policy_id: Uuid::new_v4().simple().to_string(),
            version: req.version.clone(),
            source: req.policy_content.clone(),
            fingerprint: fingerprint.clone(),
            description: req.description.clone().or(parsed.description.clone()),
            created_at: Utc::now().timestamp(),
            active: false,
        };
        inner
            .label_by_id
            .insert(record.policy_id.clone(), record.version.clone());
        inner.versions.insert(record.version.clone(), record.clone());
        inner.compiled.insert(record.version.clone(), Arc::new(compiled));

        let previous_active = if req.activate {
            activate_locked(&mut inner, &state.policies, &record.version)?
        } else {
            None
        };
        let record = inner.versions[&record.version].clone();
        (record, previous_active, req.activate)
    };

    if let Some(infra) = &state.infra {
        persist_version(infra, &record).await?;
        if let Some(previous) = &previous_active {
            persist_version(infra, previous).await?;
        }
        if activated {
            cache_active(infra, &record).await;
        }
    }

    info!(
        version = %record.version,
        fingerprint = %record.fingerprint,
        activated,
        "policy version created"
    );

    Ok(CreatePolicyResponse {
        success: true,
        policy_id: record.policy_id,
        version: record.version,
        fingerprint: record.fingerprint,
        activated,
        message: "policy version created".to_string(),
        validation_errors: Vec::new(),
    })
}

/// Activate a stored version by id. Serialized by the store mutex;
/// concurrent losers observe the winner's version afterwards.
pub async fn activate_policy(
    state: &AppState,
    policy_id: &str,
) -> Result<(Option<String>, String), AppError> {
    let (old_label, record, previous) = {
        let mut inner = lock_store(&state.policies)?;
        let label = inner
            .label_by_id
            .get(policy_id)
            .cloned()
            .ok_or_else(|| AppError::conflict("POLICY_NOT_FOUND", "cannot activate unknown policy"))?;
        let old_label = inner.active_label.clone();
        let previous = activate_locked(&mut inner, &state.policies, &label)?;
        (old_label, inner.versions[&label].clone(), previous)
    };

    if let Some(infra) = &state.infra {
        persist_version(infra, &record).await?;
        if let Some(previous) = &previous {
            persist_version(infra, previous).await?;
        }
        cache_active(infra, &record).await;
    }
    info!(old_version = ?old_label, new_version = %record.version, "policy activated");
    Ok((old_label, record.version))
}

/// Clears the previous active row, marks the target active, compiles it if
/// needed and swaps the snapshot pointer. Returns the deactivated record.
fn activate_locked(
    inner: &mut PolicyStoreInner,
    store: &PolicyStore,
    label: &str,
) -> Result<Option<PolicyVersionRecord>, AppError> {
    let compiled = match inner.compiled.get(label) {
        Some(compiled) => compiled.clone(),
        None => {
            // Cache miss: compile once under the store lock.
            let record = inner
                .versions
                .get(label)
                .ok_or_else(|| AppError::conflict("POLICY_NOT_FOUND", "cannot activate unknown policy"))?;
            let outcome = validate_policy(&record.source, false);
            let parsed = outcome.parsed.ok_or_else(|| {
                AppError::internal(
                    "COMPILE_ERROR",
                    format!("stored policy '{label}' no longer validates: {}", outcome.errors.join("; ")),
                )
            })?;
            let compiled = policy_engine_service::compile(&parsed, label, &record.fingerprint)
                .map_err(|errors| AppError::internal("COMPILE_ERROR", errors.join("; ")))?;
            let compiled = Arc::new(compiled);
            inner.compiled.insert(label.to_string(), compiled.clone());
            compiled
        }
    };

    let mut previous = None;
    if let Some(active_label) = inner.active_label.clone() {
        if active_label != label {
            if let Some(record) = inner.versions.get_mut(&active_label) {
                record.active = false;
                previous = Some(record.clone());
            }
        }
    }
    let record = inner
        .versions
        .get_mut(label)
        .ok_or_else(|| AppError::conflict("POLICY_NOT_FOUND", "cannot activate unknown policy"))?;
    record.active = true;
    inner.active_label = Some(label.to_string());
    store.snapshot.store(Some(compiled));
    Ok(previous)
}

pub fn current_record(state: &AppState) -> Result<PolicyVersionRecord, AppError> {
    let inner = lock_store(&state.policies)?;
    let label = inner
        .active_label
        .clone()
        .ok_or_else(|| AppError::not_found("ACTIVE_POLICY_NOT_SET", "no active policy"))?;
    inner
        .versions
        .get(&label)
        .cloned()
        .ok_or_else(|| AppError::internal("STORE_INCONSISTENT", "active label references missing version"))
}

pub fn current_snapshot(state: &AppState) -> Result<Arc<CompiledPolicy>, AppError> {
    state
        .policies
        .snapshot()
        .ok_or_else(|| AppError::not_found("ACTIVE_POLICY_NOT_SET", "no active policy"))
}

pub fn list_versions(state: &AppState) -> Result<Vec<PolicyVersionRecord>, AppError> {
    let inner = lock_store(&state.policies)?;
    let mut versions: Vec<PolicyVersionRecord> = inner.versions.values().cloned().collect();
    versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.version.cmp(&b.version)));
    Ok(versions)
}

/// Re-read the configured policy file and activate its content. A file
/// whose rules fingerprint matches the active version is a no-op.
pub async fn reload_policy(state: &AppState) -> Result<ReloadPolicyResponse, AppError> {
    let Some(policy_file) = &state.config.policy_file else {
        return Err(AppError::bad_request(
            "NO_POLICY_FILE",
            "POLICY_FILE is not configured; reload has nothing to track",
        ));
    };
    let source = tokio::fs::read_to_string(policy_file)
        .await
        .map_err(|e| AppError::internal("POLICY_FILE_ERROR", format!("read {policy_file} failed: {e}")))?;

    let outcome = validate_policy(&source, false);
    if !outcome.is_valid() {
        return Err(AppError::bad_request(
            "VALIDATION",
            format!("policy file invalid: {}", outcome.errors.join("; ")),
        ));
    }
    let (Some(parsed), Some(label)) = (outcome.parsed, outcome.version) else {
        return Err(AppError::internal("VALIDATION_INCONSISTENT", "valid outcome without parsed policy"));
    };
    let fingerprint = rules_fingerprint(&parsed.canonical_rules)?;

    let active = current_record(state)?;
    if active.fingerprint == fingerprint {
        let rules_count = current_snapshot(state)?.rules.len();
        return Ok(ReloadPolicyResponse {
            status: "unchanged".to_string(),
            old_version: active.version.clone(),
            new_version: active.version,
            rules_count,
        });
    }

    let created = create_policy(
        state,
        CreatePolicyRequest {
            policy_content: source,
            version: label,
            description: parsed.description.clone(),
            activate: true,
        },
    )
    .await?;
    if !created.success {
        return Err(AppError::bad_request(
            "VALIDATION",
            format!("policy file invalid: {}", created.validation_errors.join("; ")),
        ));
    }

    let rules_count = current_snapshot(state)?.rules.len();
    Ok(ReloadPolicyResponse {
        status: "reloaded".to_string(),
        old_version: active.version,
        new_version: created.version,
        rules_count,
    })
}

/// Bring the store to a usable state at startup: warm persisted versions,
/// then make sure something is active — the configured policy file when
/// present, the built-in allow-all development policy otherwise.
pub async fn init_active_policy(state: &AppState) -> Result<(), AppError> {
    if state.infra.is_some() {
        warm_from_storage(state).await?;
    }

    {
        let inner = lock_store(&state.policies)?;
        if inner.active_label.is_some() {
            return Ok(());
        }
    }

    let (source, label, description) = match &state.config.policy_file {
        Some(path) => {
            let source = tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::internal("POLICY_FILE_ERROR", format!("read {path} failed: {e}"))
            })?;
            let outcome = validate_policy(&source, false);
            if !outcome.is_valid() {
                return Err(AppError::internal(
                    "POLICY_FILE_ERROR",
                    format!("policy file invalid: {}", outcome.errors.join("; ")),
                ));
            }
            let Some(label) = outcome.version.clone() else {
                return Err(AppError::internal("POLICY_FILE_ERROR", "policy file has no version label"));
            };
            let description = outcome.parsed.and_then(|p| p.description);
            (source, label, description)
        }
        None => {
            warn!("no policy file configured; activating built-in allow-all development policy");
            (
                DEFAULT_POLICY_SOURCE.to_string(),
                "default-v1".to_string(),
                Some("Built-in allow-all development policy".to_string()),
            )
        }
    };

    let created = create_policy(
        state,
        CreatePolicyRequest {
            policy_content: source,
            version: label,
            description,
            activate: true,
        },
    )
    .await?;
    if !created.success {
        return Err(AppError::internal(
            "POLICY_INIT_ERROR",
            created.validation_errors.join("; "),
        ));
    }
    Ok(())
}

async fn warm_from_storage(state: &AppState) -> Result<(), AppError> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    let coll: Collection<PolicyVersionRecord> = infra.mongo_db.collection(POLICY_VERSIONS_COLLECTION);
    let mut cursor = coll
        .find(doc! {})
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("policy scan failed: {e}")))?;

    let mut records = Vec::new();
    while let Some(record) = cursor
        .try_next()
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("policy scan failed: {e}")))?
    {
        records.push(record);
    }

    let mut active_label = None;
    {
        let mut inner = lock_store(&state.policies)?;
        for record in records {
            if record.active {
                active_label = Some(record.version.clone());
            }
            inner
                .label_by_id
                .insert(record.policy_id.clone(), record.version.clone());
            inner.versions.insert(record.version.clone(), record);
        }
        if let Some(label) = &active_label {
            activate_locked(&mut inner, &state.policies, label)?;
        }
    }
    if let Some(label) = active_label {
        info!(version = %label, "active policy warmed from storage");
    }
    Ok(())
}

async fn persist_version(infra: &InfraClients, record: &PolicyVersionRecord) -> Result<(), AppError> {
    let coll: Collection<PolicyVersionRecord> = infra.mongo_db.collection(POLICY_VERSIONS_COLLECTION);
    coll.replace_one(doc! { "policy_id": &record.policy_id }, record)
        .upsert(true)
        .await
        .map_err(|e| AppError::internal("PERSISTENCE_ERROR", format!("upsert policy failed: {e}")))?;
    Ok(())
}

async fn cache_active(infra: &InfraClients, record: &PolicyVersionRecord) {
    let payload = match serde_json::to_string(record) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "active policy cache encode failed");
            return;
        }
    };
    let mut conn = match infra.redis.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "redis connect failed; active policy cache skipped");
            return;
        }
    };
    let cached: Result<(), _> = conn.set_ex(ACTIVE_POLICY_CACHE_KEY, payload, 3600).await;
    if let Err(e) = cached {
        warn!(error = %e, "active policy cache write failed");
    }
}

fn lock_store(store: &PolicyStore) -> Result<MutexGuard<'_, PolicyStoreInner>, AppError> {
    store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "policy store lock poisoned"))
}
