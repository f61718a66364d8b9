use serde_json::{Map, Value};

use crate::service::hash_service::sha256_hex;

pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().cloned().collect::<Vec<_>>();
            keys.sort();
            let mut ordered = Map::new();
            for key in keys {
                if let Some(v) = map.get(&key) {
                    ordered.insert(key, canonicalize(v));
                }
            }
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}

pub fn canonical_string(value: &Value) -> Result<String, String> {
    serde_json::to_string(&canonicalize(value)).map_err(|e| format!("canonical serialization failed: {e}"))
}

/// Stable fingerprint of an ordered rule list: sha256 over the canonical
/// compact serialization. Identical rule lists fingerprint identically
/// regardless of map-key order in the source document.
pub fn rules_fingerprint(rules: &Value) -> Result<String, String> {
    Ok(sha256_hex(&canonical_string(rules)?))
}
