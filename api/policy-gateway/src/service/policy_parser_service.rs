//! Declarative policy document parsing and validation.
//!
//! The wire format is YAML; internally everything is walked as JSON values
//! so validation, canonicalization and fingerprinting share one
//! representation. Validation collects every problem instead of failing on
//! the first, and never touches storage.

use serde_json::{Map, Value};

use crate::module::session::model::Action;
use crate::service::canonical_json_service::canonicalize;

const RULE_FIELDS: &[&str] = &["name", "action", "tools", "conditions", "reason", "description"];

#[derive(Debug, Clone)]
pub struct ParsedPolicy {
    pub version: Option<String>,
    pub description: Option<String>,
    pub default_action: Action,
    pub default_reason: String,
    pub rules: Vec<ParsedRule>,
    /// Canonicalized `rules` array, the fingerprint input.
    pub canonical_rules: Value,
}

#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub index: usize,
    pub name: String,
    pub action: Action,
    pub tools: Vec<String>,
    pub arg_contains: Vec<(String, String)>,
    pub arg_not_contains: Vec<(String, String)>,
    pub session_context: Vec<(String, Value)>,
    pub metadata: Vec<(String, Value)>,
    pub reason: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rules_count: usize,
    pub version: Option<String>,
    pub parsed: Option<ParsedPolicy>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn parse_action(raw: &str) -> Option<Action> {
    match raw {
        "allow" => Some(Action::Allow),
        "deny" => Some(Action::Deny),
        "approve" => Some(Action::Approve),
        _ => None,
    }
}

/// Parse and structurally validate a policy source document.
///
/// Duplicate rule names are warning-level unless `strict`; predicate
/// expression problems (bad regex, bad comparison tokens) are caught by the
/// trial compilation the policy store runs right after this.
pub fn validate_source(source: &str, strict: bool) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let yaml: serde_yaml::Value = match serde_yaml::from_str(source) {
        Ok(v) => v,
        Err(e) => {
            outcome.errors.push(format!("invalid YAML syntax: {e}"));
            return outcome;
        }
    };
    let doc: Value = match serde_json::to_value(&yaml) {
        Ok(v) => v,
        Err(e) => {
            outcome.errors.push(format!("policy document is not JSON-representable: {e}"));
            return outcome;
        }
    };

    let Some(root) = doc.as_object() else {
        outcome.errors.push("policy must be a mapping".to_string());
        return outcome;
    };

    outcome.version = root.get("version").and_then(Value::as_str).map(str::to_string);
    if outcome.version.is_none() {
        outcome.errors.push("policy must have a 'version' field".to_string());
    }
    let description = root
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    let default_action = match root.get("default_action") {
        None => Action::Deny,
        Some(v) => match v.as_str().and_then(parse_action) {
            Some(a) => a,
            None => {
                outcome
                    .errors
                    .push("'default_action' must be 'allow', 'deny', or 'approve'".to_string());
                Action::Deny
            }
        },
    };
    let default_reason = root
        .get("default_reason")
        .and_then(Value::as_str)
        .unwrap_or("No matching policy rule found")
        .to_string();

    let rules_value = match root.get("rules") {
        None => {
            outcome.errors.push("policy must have a 'rules' field".to_string());
            return outcome;
        }
        Some(v) => v,
    };
    let Some(raw_rules) = rules_value.as_array() else {
        outcome.errors.push("'rules' must be a list".to_string());
        return outcome;
    };
    if raw_rules.is_empty() {
        outcome.errors.push("policy defines no rules".to_string());
        return outcome;
    }

    let mut rules = Vec::with_capacity(raw_rules.len());
    let mut seen_names: Vec<String> = Vec::new();
    for (index, raw) in raw_rules.iter().enumerate() {
        match validate_rule(index, raw, &mut outcome.errors) {
            Some(rule) => {
                if seen_names.contains(&rule.name) {
                    let note = format!("duplicate rule name '{}'", rule.name);
                    if strict {
                        outcome.errors.push(note);
                    } else {
                        outcome.warnings.push(note);
                    }
                } else {
                    seen_names.push(rule.name.clone());
                }
                rules.push(rule);
            }
            None => continue,
        }
    }

    outcome.rules_count = raw_rules.len();
    if outcome.errors.is_empty() {
        outcome.parsed = Some(ParsedPolicy {
            version: outcome.version.clone(),
            description,
            default_action,
            default_reason,
            rules,
            canonical_rules: canonicalize(rules_value),
        });
    }
    outcome
}

fn validate_rule(index: usize, raw: &Value, errors: &mut Vec<String>) -> Option<ParsedRule> {
    let Some(obj) = raw.as_object() else {
        errors.push(format!("rule {index} must be a mapping"));
        return None;
    };

    for key in obj.keys() {
        if !RULE_FIELDS.contains(&key.as_str()) {
            errors.push(format!("rule {index}: unknown field '{key}'"));
        }
    }

    let name = match obj.get("name").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n.to_string(),
        _ => {
            errors.push(format!("rule {index} must have a 'name' field"));
            return None;
        }
    };

    let action = match obj.get("action").and_then(Value::as_str) {
        None => {
            errors.push(format!("rule '{name}' must have an 'action' field"));
            return None;
        }
        Some(raw_action) => match parse_action(raw_action) {
            Some(a) => a,
            None => {
                errors.push(format!(
                    "rule '{name}': action '{raw_action}' must be 'allow', 'deny', or 'approve'"
                ));
                return None;
            }
        },
    };

    let tools = match obj.get("tools") {
        None => vec!["*".to_string()],
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => {
            let mut tools = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => tools.push(s.to_string()),
                    None => {
                        errors.push(format!("rule '{name}': 'tools' entries must be strings"));
                        return None;
                    }
                }
            }
            tools
        }
        Some(_) => {
            errors.push(format!("rule '{name}': 'tools' must be a string or a list"));
            return None;
        }
    };

    let mut rule = ParsedRule {
        index,
        name: name.clone(),
        action,
        tools,
        arg_contains: Vec::new(),
        arg_not_contains: Vec::new(),
        session_context: Vec::new(),
        metadata: Vec::new(),
        reason: obj.get("reason").and_then(Value::as_str).map(str::to_string),
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    if let Some(conditions) = obj.get("conditions") {
        let Some(conditions) = conditions.as_object() else {
            errors.push(format!("rule '{name}': 'conditions' must be a mapping"));
            return None;
        };
        for (key, value) in conditions {
            match key.as_str() {
                "arg_contains" => collect_string_map(&name, key, value, &mut rule.arg_contains, errors),
                "arg_not_contains" => {
                    collect_string_map(&name, key, value, &mut rule.arg_not_contains, errors)
                }
                "session_context" => {
                    collect_value_map(&name, key, value, &mut rule.session_context, errors)
                }
                "metadata" => collect_value_map(&name, key, value, &mut rule.metadata, errors),
                other => errors.push(format!(
                    "rule '{name}': unsupported condition '{other}'"
                )),
            }
        }
    }

    // Returned even when condition errors were recorded so duplicate-name
    // detection still sees this rule.
    Some(rule)
}

fn collect_string_map(
    rule: &str,
    key: &str,
    value: &Value,
    out: &mut Vec<(String, String)>,
    errors: &mut Vec<String>,
) {
    let Some(map) = value.as_object() else {
        errors.push(format!("rule '{rule}': '{key}' must be a mapping"));
        return;
    };
    for (path, pattern) in map {
        match pattern.as_str() {
            Some(p) => out.push((path.clone(), p.to_string())),
            None => errors.push(format!(
                "rule '{rule}': '{key}.{path}' must be a string pattern"
            )),
        }
    }
}

fn collect_value_map(
    rule: &str,
    key: &str,
    value: &Value,
    out: &mut Vec<(String, Value)>,
    errors: &mut Vec<String>,
) {
    let Some(map) = value.as_object() else {
        errors.push(format!("rule '{rule}': '{key}' must be a mapping"));
        return;
    };
    for (context_key, expected) in map {
        if expected.is_object() {
            errors.push(format!(
                "rule '{rule}': '{key}.{context_key}' has an unparseable nested expression"
            ));
            continue;
        }
        out.push((context_key.clone(), expected.clone()));
    }
}

/// Render a parsed rule back into the shape `GET /policy/current` exposes.
pub fn rule_listing(rule: &ParsedRule) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::String(rule.name.clone()));
    obj.insert(
        "action".to_string(),
        Value::String(rule.action.as_str().to_string()),
    );
    obj.insert(
        "tools".to_string(),
        Value::Array(rule.tools.iter().cloned().map(Value::String).collect()),
    );
    if let Some(description) = &rule.description {
        obj.insert("description".to_string(), Value::String(description.clone()));
    }
    Value::Object(obj)
}
