use serde::{Deserialize, Serialize};

/// Immutable stored policy version. At most one record is `active` at any
/// instant; activation is serialized by the policy store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersionRecord {
    pub policy_id: String,
    pub version: String,
    pub source: String,
    pub fingerprint: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub active: bool,
}
