//! Audit-log hash chain.
//!
//! Every entry's `own_hash` is an HMAC-SHA256, keyed by the server-side
//! secret, over the canonical JSON of the fields frozen at append time.
//! Hash input fields, in canonical (sorted-key) order:
//!
//!   bypass, decision, policy_version, prev_hash, reason, rule_name,
//!   seq_index, session_id, timestamp, tool_args, tool_name
//!
//! Outcome fields (`status`, `result`, `error_message`, `duration_ms`) are
//! excluded: the chain commits the decision, not the outcome, so sealing a
//! result later does not disturb prior links.

use serde_json::json;

use crate::module::session::model::LogEntryRecord;
use crate::service::canonical_json_service::canonical_string;
use crate::service::hash_service::hmac_sha256_hex;

/// Fixed `prev_hash` of the first entry in every session.
pub const GENESIS_HASH: &str = "genesis";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainViolation {
    pub session_id: String,
    pub seq_index: u64,
    pub log_id: String,
    pub kind: String,
    pub detail: String,
}

pub fn entry_hash(secret: &str, entry: &LogEntryRecord) -> Result<String, String> {
    let payload = json!({
        "session_id": entry.session_id,
        "seq_index": entry.seq_index,
        "timestamp": entry.timestamp,
        "tool_name": entry.tool_name,
        "tool_args": entry.tool_args,
        "policy_version": entry.policy_version,
        "decision": entry.decision.as_str(),
        "rule_name": entry.rule_name,
        "reason": entry.reason,
        "bypass": entry.bypass,
        "prev_hash": entry.prev_hash,
    });
    hmac_sha256_hex(&canonical_string(&payload)?, secret)
}

/// Verify one session's entries, ordered ascending by `seq_index`.
///
/// Checks, in order of severity per entry: index contiguity, prev-hash
/// linkage, and hash correctness. Reports every violation found instead of
/// stopping at the first so a compliance report can show the full damage.
pub fn verify_session_chain(
    secret: &str,
    entries: &[LogEntryRecord],
) -> Result<Vec<ChainViolation>, String> {
    let mut violations = Vec::new();
    let mut prev: Option<&LogEntryRecord> = None;

    for entry in entries {
        match prev {
            None => {
                if entry.seq_index == 1 && entry.prev_hash != GENESIS_HASH {
                    violations.push(violation(
                        entry,
                        "prev_hash_mismatch",
                        format!("first entry prev_hash is not '{GENESIS_HASH}'"),
                    ));
                }
            }
            Some(p) => {
                if entry.seq_index != p.seq_index + 1 {
                    violations.push(violation(
                        entry,
                        "index_gap",
                        format!("expected index {}, found {}", p.seq_index + 1, entry.seq_index),
                    ));
                }
                if entry.prev_hash != p.own_hash {
                    violations.push(violation(
                        entry,
                        "prev_hash_mismatch",
                        format!("prev_hash does not match own_hash of entry {}", p.seq_index),
                    ));
                }
            }
        }

        let recomputed = entry_hash(secret, entry)?;
        if recomputed != entry.own_hash {
            violations.push(violation(
                entry,
                "hash_mismatch",
                "stored own_hash does not match recomputed value".to_string(),
            ));
        }

        prev = Some(entry);
    }

    Ok(violations)
}

fn violation(entry: &LogEntryRecord, kind: &str, detail: String) -> ChainViolation {
    ChainViolation {
        session_id: entry.session_id.clone(),
        seq_index: entry.seq_index,
        log_id: entry.log_id.clone(),
        kind: kind.to_string(),
        detail,
    }
}
