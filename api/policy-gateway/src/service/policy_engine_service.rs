//! Policy rule compilation and evaluation.
//!
//! Compilation happens once per policy version: regexes are built, literal
//! tool sets become hash sets, and context matchers are classified. The
//! evaluator itself is a pure function of (compiled policy, call) — the
//! only clock it sees is the wall-clock sample captured by the enforcement
//! service at call entry.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use regex::Regex;
use serde_json::{Map, Value};

use crate::module::session::model::Action;
use crate::service::policy_parser_service::{ParsedPolicy, ParsedRule};

#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub version: String,
    pub fingerprint: String,
    pub description: Option<String>,
    pub default_action: Action,
    pub default_reason: String,
    pub rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub index: usize,
    pub name: String,
    pub action: Action,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub tools: Vec<String>,
    tool_any: bool,
    tool_literals: HashSet<String>,
    tool_regexes: Vec<Regex>,
    arg_contains: Vec<ArgClause>,
    arg_not_contains: Vec<ArgClause>,
    session_context: Vec<KeyClause>,
    metadata: Vec<KeyClause>,
}

#[derive(Debug, Clone)]
struct ArgClause {
    path: String,
    branches: Vec<String>,
}

#[derive(Debug, Clone)]
struct KeyClause {
    key: String,
    matcher: ValueMatcher,
}

#[derive(Debug, Clone)]
enum ValueMatcher {
    Literal(String),
    OneOf(Vec<String>),
    GreaterThan(f64),
    LessThan(f64),
    /// Minutes since midnight, inclusive; wraps past midnight when start > end.
    TimeRange(u32, u32),
    Weekdays(Vec<Weekday>),
}

/// A tool call flattened for evaluation.
#[derive(Debug)]
pub struct EvalCall<'a> {
    pub tool_name: &'a str,
    pub tool_args: &'a Value,
    pub session_context: &'a Map<String, Value>,
    pub metadata: &'a Map<String, Value>,
    /// Wall-clock sample captured at call entry.
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
}

/// Compile a parsed policy. Predicate expressions that cannot be compiled
/// (a bad regex, a malformed comparison token) are collected as errors so
/// `Validate` reports them before the version can ever be stored.
pub fn compile(
    parsed: &ParsedPolicy,
    version: &str,
    fingerprint: &str,
) -> Result<CompiledPolicy, Vec<String>> {
    let mut errors = Vec::new();
    let mut rules = Vec::with_capacity(parsed.rules.len());
    for rule in &parsed.rules {
        match compile_rule(rule) {
            Ok(compiled) => rules.push(compiled),
            Err(mut rule_errors) => errors.append(&mut rule_errors),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(CompiledPolicy {
        version: version.to_string(),
        fingerprint: fingerprint.to_string(),
        description: parsed.description.clone(),
        default_action: parsed.default_action,
        default_reason: parsed.default_reason.clone(),
        rules,
    })
}

fn compile_rule(rule: &ParsedRule) -> Result<CompiledRule, Vec<String>> {
    let mut errors = Vec::new();

    let mut tool_any = false;
    let mut tool_literals = HashSet::new();
    let mut tool_regexes = Vec::new();
    for pattern in &rule.tools {
        if pattern == "*" {
            tool_any = true;
        } else if let Some(inner) = pattern
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            match Regex::new(&format!("^(?:{inner})$")) {
                Ok(re) => tool_regexes.push(re),
                Err(e) => errors.push(format!(
                    "rule '{}': invalid tool regex '{pattern}': {e}",
                    rule.name
                )),
            }
        } else {
            tool_literals.insert(pattern.clone());
        }
    }

    let session_context = compile_key_clauses(rule, "session_context", &rule.session_context, &mut errors);
    let metadata = compile_key_clauses(rule, "metadata", &rule.metadata, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(CompiledRule {
        index: rule.index,
        name: rule.name.clone(),
        action: rule.action,
        reason: rule.reason.clone(),
        description: rule.description.clone(),
        tools: rule.tools.clone(),
        tool_any,
        tool_literals,
        tool_regexes,
        arg_contains: compile_arg_clauses(&rule.arg_contains),
        arg_not_contains: compile_arg_clauses(&rule.arg_not_contains),
        session_context,
        metadata,
    })
}

fn compile_arg_clauses(raw: &[(String, String)]) -> Vec<ArgClause> {
    raw.iter()
        .map(|(path, pattern)| ArgClause {
            path: path.clone(),
            branches: pattern.split('|').map(str::to_string).collect(),
        })
        .collect()
}

fn compile_key_clauses(
    rule: &ParsedRule,
    group: &str,
    raw: &[(String, Value)],
    errors: &mut Vec<String>,
) -> Vec<KeyClause> {
    let mut clauses = Vec::with_capacity(raw.len());
    for (key, expected) in raw {
        match compile_matcher(expected) {
            Ok(matcher) => clauses.push(KeyClause {
                key: key.clone(),
                matcher,
            }),
            Err(e) => errors.push(format!("rule '{}': {group}.{key}: {e}", rule.name)),
        }
    }
    clauses
}

fn compile_matcher(expected: &Value) -> Result<ValueMatcher, String> {
    match expected {
        Value::Array(items) => {
            let mut literals = Vec::with_capacity(items.len());
            for item in items {
                match value_text(item) {
                    Some(text) => literals.push(text),
                    None => return Err("list entries must be scalars".to_string()),
                }
            }
            let weekdays: Vec<Weekday> = literals
                .iter()
                .filter_map(|l| parse_weekday(l))
                .collect();
            if !literals.is_empty() && weekdays.len() == literals.len() {
                Ok(ValueMatcher::Weekdays(weekdays))
            } else {
                Ok(ValueMatcher::OneOf(literals))
            }
        }
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix('>') {
                let n = rest
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("unparseable comparison token '{s}'"))?;
                Ok(ValueMatcher::GreaterThan(n))
            } else if let Some(rest) = s.strip_prefix('<') {
                let n = rest
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("unparseable comparison token '{s}'"))?;
                Ok(ValueMatcher::LessThan(n))
            } else if let Some((start, end)) = parse_time_range(s) {
                Ok(ValueMatcher::TimeRange(start, end))
            } else {
                Ok(ValueMatcher::Literal(s.clone()))
            }
        }
        other => match value_text(other) {
            Some(text) => Ok(ValueMatcher::Literal(text)),
            None => Err("expected a scalar or a list".to_string()),
        },
    }
}

/// Evaluate a call against a compiled policy: first matching rule wins,
/// otherwise the policy-wide default applies.
pub fn evaluate(policy: &CompiledPolicy, call: &EvalCall<'_>) -> Decision {
    for rule in &policy.rules {
        if rule_matches(rule, call) {
            return Decision {
                action: rule.action,
                rule_name: Some(rule.name.clone()),
                reason: rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("Matched rule '{}'", rule.name)),
                policy_version: policy.version.clone(),
            };
        }
    }
    Decision {
        action: policy.default_action,
        rule_name: None,
        reason: policy.default_reason.clone(),
        policy_version: policy.version.clone(),
    }
}

fn rule_matches(rule: &CompiledRule, call: &EvalCall<'_>) -> bool {
    if !tool_matches(rule, call.tool_name) {
        return false;
    }
    for clause in &rule.arg_contains {
        if !arg_clause_holds(clause, call.tool_args) {
            return false;
        }
    }
    for clause in &rule.arg_not_contains {
        if arg_clause_holds(clause, call.tool_args) {
            return false;
        }
    }
    for clause in &rule.session_context {
        if !key_clause_holds(clause, call.session_context, call.now) {
            return false;
        }
    }
    for clause in &rule.metadata {
        if !key_clause_holds(clause, call.metadata, call.now) {
            return false;
        }
    }
    true
}

fn tool_matches(rule: &CompiledRule, tool_name: &str) -> bool {
    if rule.tool_any || rule.tool_literals.contains(tool_name) {
        return true;
    }
    rule.tool_regexes.iter().any(|re| re.is_match(tool_name))
}

fn arg_clause_holds(clause: &ArgClause, tool_args: &Value) -> bool {
    let Some(value) = resolve_path(tool_args, &clause.path) else {
        return false;
    };
    let Some(text) = value_text(value) else {
        return false;
    };
    clause.branches.iter().any(|branch| text.contains(branch))
}

fn key_clause_holds(clause: &KeyClause, bag: &Map<String, Value>, now: DateTime<Utc>) -> bool {
    // Time-of-day and weekday clauses read only the evaluation clock.
    match &clause.matcher {
        ValueMatcher::TimeRange(start, end) => {
            if !bag.contains_key(&clause.key) {
                return false;
            }
            let minutes = now.hour() * 60 + now.minute();
            if start <= end {
                (*start..=*end).contains(&minutes)
            } else {
                minutes >= *start || minutes <= *end
            }
        }
        ValueMatcher::Weekdays(days) => {
            if !bag.contains_key(&clause.key) {
                return false;
            }
            days.contains(&now.weekday())
        }
        matcher => {
            let Some(value) = bag.get(&clause.key) else {
                return false;
            };
            let Some(text) = value_text(value) else {
                return false;
            };
            match matcher {
                ValueMatcher::Literal(expected) => &text == expected,
                ValueMatcher::OneOf(options) => options.contains(&text),
                ValueMatcher::GreaterThan(n) => text.parse::<f64>().map(|v| v > *n).unwrap_or(false),
                ValueMatcher::LessThan(n) => text.parse::<f64>().map(|v| v < *n).unwrap_or(false),
                ValueMatcher::TimeRange(..) | ValueMatcher::Weekdays(..) => unreachable!(),
            }
        }
    }
}

/// Dotted-path lookup into a JSON value; numeric segments index arrays.
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String rendering used by clause comparisons: strings are taken verbatim,
/// other JSON values render compactly, null is treated as absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_time_range(raw: &str) -> Option<(u32, u32)> {
    let (start, end) = raw.split_once('-')?;
    Some((parse_hhmm(start)?, parse_hhmm(end)?))
}

fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let hours = h.parse::<u32>().ok()?;
    let minutes = m.parse::<u32>().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.to_ascii_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::canonical_json_service::rules_fingerprint;
    use crate::service::policy_parser_service::validate_source;
    use chrono::TimeZone;
    use serde_json::json;

    fn compiled(source: &str) -> CompiledPolicy {
        let outcome = validate_source(source, false);
        assert!(outcome.is_valid(), "errors: {:?}", outcome.errors);
        let parsed = outcome.parsed.unwrap();
        let fingerprint = rules_fingerprint(&parsed.canonical_rules).unwrap();
        compile(&parsed, outcome.version.as_deref().unwrap_or("v1"), &fingerprint).unwrap()
    }

    fn call<'a>(
        tool_name: &'a str,
        tool_args: &'a Value,
        context: &'a Map<String, Value>,
        metadata: &'a Map<String, Value>,
    ) -> EvalCall<'a> {
        EvalCall {
            tool_name,
            tool_args,
            session_context: context,
            metadata,
            now: Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap(), // a Monday
        }
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    const POLICY: &str = r#"
version: "v1"
rules:
  - name: "deny_system_paths"
    action: deny
    tools: ["read_file"]
    conditions:
      arg_contains:
        path: "/etc/|/sys/"
    reason: "system paths are off limits"
  - name: "allow_reads"
    action: allow
    tools: ["read_file", "list_dir"]
  - name: "approve_deletes"
    action: approve
    tools: ["/delete_.*/"]
  - name: "allow_admin_anything"
    action: allow
    tools: ["*"]
    conditions:
      session_context:
        role: ["admin", "operator"]
default_action: deny
default_reason: "nothing matched"
"#;

    #[test]
    fn first_match_wins_in_order() {
        let policy = compiled(POLICY);
        let args = json!({"path": "/etc/passwd"});
        let ctx = obj(json!({}));
        let meta = obj(json!({}));
        let decision = evaluate(&policy, &call("read_file", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.rule_name.as_deref(), Some("deny_system_paths"));
        assert_eq!(decision.reason, "system paths are off limits");
    }

    #[test]
    fn literal_tool_list_matches() {
        let policy = compiled(POLICY);
        let args = json!({"path": "/tmp/a"});
        let ctx = obj(json!({}));
        let meta = obj(json!({}));
        let decision = evaluate(&policy, &call("read_file", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.rule_name.as_deref(), Some("allow_reads"));
        assert_eq!(decision.reason, "Matched rule 'allow_reads'");
    }

    #[test]
    fn regex_tool_pattern_is_anchored() {
        let policy = compiled(POLICY);
        let args = json!({});
        let ctx = obj(json!({}));
        let meta = obj(json!({}));
        let decision = evaluate(&policy, &call("delete_file", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Approve);

        let decision = evaluate(&policy, &call("undelete_file", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.rule_name, None);
        assert_eq!(decision.reason, "nothing matched");
    }

    #[test]
    fn context_membership_matches() {
        let policy = compiled(POLICY);
        let args = json!({});
        let ctx = obj(json!({"role": "admin"}));
        let meta = obj(json!({}));
        let decision = evaluate(&policy, &call("shell_exec", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.rule_name.as_deref(), Some("allow_admin_anything"));
    }

    #[test]
    fn missing_context_key_never_matches() {
        let policy = compiled(POLICY);
        let args = json!({});
        let ctx = obj(json!({}));
        let meta = obj(json!({}));
        let decision = evaluate(&policy, &call("shell_exec", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.rule_name, None);
    }

    #[test]
    fn numeric_and_time_clauses() {
        let policy = compiled(
            r#"
version: "v1"
rules:
  - name: "office_hours_small_amounts"
    action: allow
    tools: ["transfer"]
    conditions:
      session_context:
        hour_window: "09:00-17:00"
      metadata:
        amount: "<1000"
default_action: deny
"#,
        );
        let args = json!({});
        let ctx = obj(json!({"hour_window": "present"}));
        let meta = obj(json!({"amount": 250}));
        // 14:30 UTC falls inside the window.
        let decision = evaluate(&policy, &call("transfer", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Allow);

        let meta = obj(json!({"amount": 5000}));
        let decision = evaluate(&policy, &call("transfer", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Deny);

        let meta = obj(json!({"amount": "not-a-number"}));
        let decision = evaluate(&policy, &call("transfer", &args, &ctx, &meta));
        assert_eq!(decision.action, Action::Deny);
    }

    #[test]
    fn wrapping_time_range_covers_midnight() {
        let policy = compiled(
            r#"
version: "v1"
rules:
  - name: "night_shift"
    action: allow
    tools: ["*"]
    conditions:
      session_context:
        shift: "22:00-06:00"
default_action: deny
"#,
        );
        let args = json!({});
        let ctx = obj(json!({"shift": "on"}));
        let meta = obj(json!({}));

        let mut c = call("anything", &args, &ctx, &meta);
        c.now = Utc.with_ymd_and_hms(2025, 6, 2, 23, 15, 0).unwrap();
        assert_eq!(evaluate(&policy, &c).action, Action::Allow);

        c.now = Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap();
        assert_eq!(evaluate(&policy, &c).action, Action::Allow);

        c.now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        assert_eq!(evaluate(&policy, &c).action, Action::Deny);
    }

    #[test]
    fn weekday_list_matches_the_clock() {
        let policy = compiled(
            r#"
version: "v1"
rules:
  - name: "weekdays_only"
    action: allow
    tools: ["*"]
    conditions:
      session_context:
        workday: ["mon", "tue", "wed", "thu", "fri"]
default_action: deny
"#,
        );
        let args = json!({});
        let ctx = obj(json!({"workday": "yes"}));
        let meta = obj(json!({}));

        let mut c = call("anything", &args, &ctx, &meta);
        assert_eq!(evaluate(&policy, &c).action, Action::Allow); // Monday

        c.now = Utc.with_ymd_and_hms(2025, 6, 7, 14, 30, 0).unwrap(); // Saturday
        assert_eq!(evaluate(&policy, &c).action, Action::Deny);
    }

    #[test]
    fn arg_not_contains_negates() {
        let policy = compiled(
            r#"
version: "v1"
rules:
  - name: "writes_outside_home"
    action: deny
    tools: ["write_file"]
    conditions:
      arg_not_contains:
        path: "/home/"
default_action: allow
"#,
        );
        let ctx = obj(json!({}));
        let meta = obj(json!({}));

        let args = json!({"path": "/var/log/x"});
        assert_eq!(
            evaluate(&policy, &call("write_file", &args, &ctx, &meta)).action,
            Action::Deny
        );

        let args = json!({"path": "/home/u/x"});
        assert_eq!(
            evaluate(&policy, &call("write_file", &args, &ctx, &meta)).action,
            Action::Allow
        );

        // A missing path also satisfies arg_not_contains.
        let args = json!({});
        assert_eq!(
            evaluate(&policy, &call("write_file", &args, &ctx, &meta)).action,
            Action::Deny
        );
    }

    #[test]
    fn dotted_paths_reach_nested_args() {
        let policy = compiled(
            r#"
version: "v1"
rules:
  - name: "deny_prod_db"
    action: deny
    tools: ["query"]
    conditions:
      arg_contains:
        connection.host: "prod"
default_action: allow
"#,
        );
        let ctx = obj(json!({}));
        let meta = obj(json!({}));
        let args = json!({"connection": {"host": "prod-db-1"}});
        assert_eq!(
            evaluate(&policy, &call("query", &args, &ctx, &meta)).action,
            Action::Deny
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let policy = compiled(POLICY);
        let args = json!({"path": "/etc/passwd"});
        let ctx = obj(json!({"role": "admin"}));
        let meta = obj(json!({"team": "sre"}));
        let c = call("read_file", &args, &ctx, &meta);
        let first = evaluate(&policy, &c);
        for _ in 0..10 {
            assert_eq!(evaluate(&policy, &c), first);
        }
    }

    #[test]
    fn bad_regex_fails_compilation() {
        let outcome = validate_source(
            "version: \"v1\"\nrules:\n  - name: r\n    action: allow\n    tools: [\"/(unclosed/\"]\n",
            false,
        );
        let parsed = outcome.parsed.unwrap();
        let err = compile(&parsed, "v1", "f").unwrap_err();
        assert!(err[0].contains("invalid tool regex"));
    }
}
