use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static ENFORCE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static DECISIONS_ALLOWED: AtomicU64 = AtomicU64::new(0);
static DECISIONS_DENIED: AtomicU64 = AtomicU64::new(0);
static DECISIONS_APPROVAL: AtomicU64 = AtomicU64::new(0);
static OUTCOMES_SEALED: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);
static SWEEPS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_DELETED: AtomicU64 = AtomicU64::new(0);
static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub enforce_requests: u64,
    pub decisions_allowed: u64,
    pub decisions_denied: u64,
    pub decisions_approval_required: u64,
    pub outcomes_sealed: u64,
    pub events_published: u64,
    pub events_dropped: u64,
    pub sweeps_completed: u64,
    pub sessions_deleted: u64,
    pub last_error_ts: i64,
}

pub fn inc_enforce_requests() {
    ENFORCE_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_decision(action: crate::module::session::model::Action) {
    use crate::module::session::model::Action;
    match action {
        Action::Allow => DECISIONS_ALLOWED.fetch_add(1, Ordering::Relaxed),
        Action::Deny => DECISIONS_DENIED.fetch_add(1, Ordering::Relaxed),
        Action::Approve => DECISIONS_APPROVAL.fetch_add(1, Ordering::Relaxed),
    };
}

pub fn inc_outcomes_sealed() {
    OUTCOMES_SEALED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_events_published() {
    EVENTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_events_dropped(count: u64) {
    EVENTS_DROPPED.fetch_add(count, Ordering::Relaxed);
}

pub fn inc_sweeps_completed() {
    SWEEPS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_sessions_deleted(count: u64) {
    SESSIONS_DELETED.fetch_add(count, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        enforce_requests: ENFORCE_REQUESTS.load(Ordering::Relaxed),
        decisions_allowed: DECISIONS_ALLOWED.load(Ordering::Relaxed),
        decisions_denied: DECISIONS_DENIED.load(Ordering::Relaxed),
        decisions_approval_required: DECISIONS_APPROVAL.load(Ordering::Relaxed),
        outcomes_sealed: OUTCOMES_SEALED.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        events_dropped: EVENTS_DROPPED.load(Ordering::Relaxed),
        sweeps_completed: SWEEPS_COMPLETED.load(Ordering::Relaxed),
        sessions_deleted: SESSIONS_DELETED.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
