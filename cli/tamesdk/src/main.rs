//! `tamesdk` — command-line client for the Tame policy gateway.
//!
//! Exit codes follow the decision: 0 allow, 1 error, 2 deny, 3 approve.

mod client;
mod config;
mod output;

use std::io::{BufRead, Write};

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use client::{Client, ClientError, EnforcementDecision};
use config::TameConfig;
use output::{format_clock, format_time, print_json, print_table};

const EXIT_ALLOW: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_DENY: i32 = 2;
const EXIT_APPROVE: i32 = 3;

/// Runtime control for AI agent tool calls.
///
/// Configuration comes from TAME_API_URL, TAME_API_KEY, TAME_SESSION_ID,
/// TAME_AGENT_ID, TAME_USER_ID and TAME_BYPASS_MODE, overridden by flags.
#[derive(Parser)]
#[command(name = "tamesdk", about = "Tame policy gateway CLI")]
struct Cli {
    /// Tame API base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Bearer token for authentication.
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Session identifier attached to enforced calls.
    #[arg(long, global = true)]
    session_id: Option<String>,
    /// Agent identifier attached to enforced calls.
    #[arg(long, global = true)]
    agent_id: Option<String>,
    /// User identifier attached to enforced calls.
    #[arg(long, global = true)]
    user_id: Option<String>,
    /// Request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Short-circuit every decision to allow without calling the server.
    #[arg(long, global = true)]
    bypass: bool,
    /// Verbose output.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check connectivity and show the server's policy and mode.
    Status,
    /// Enforce a tool call and print the decision.
    Test {
        /// Name of the tool to test.
        tool_name: String,
        /// Tool arguments as JSON or k=v,k=v pairs.
        #[arg(long)]
        args: Option<String>,
        /// Evaluate without writing an audit entry.
        #[arg(long)]
        dry_run: bool,
    },
    /// Enforce a tool call with explicit identifiers.
    Enforce {
        #[arg(long)]
        tool: String,
        /// Tool arguments as JSON or k=v,k=v pairs.
        #[arg(long)]
        args: Option<String>,
        /// Caller metadata as JSON.
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Show the log entries of a session.
    Logs {
        /// Session to inspect; defaults to the configured session.
        session: Option<String>,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Show the active policy.
    Policy,
    /// Interactive prompt.
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = resolve_config(&cli);

    let client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_ERROR);
        }
    };

    let code = match &cli.command {
        Command::Status => cmd_status(&client).await,
        Command::Test {
            tool_name,
            args,
            dry_run,
        } => cmd_test(&client, tool_name, args.as_deref(), *dry_run, cli.verbose).await,
        Command::Enforce {
            tool,
            args,
            metadata,
            session,
            agent,
            user,
        } => {
            cmd_enforce(
                &client,
                tool,
                args.as_deref(),
                metadata.as_deref(),
                session.as_deref(),
                agent.as_deref(),
                user.as_deref(),
                cli.verbose,
            )
            .await
        }
        Command::Logs { session, format } => cmd_logs(&client, session.as_deref(), format).await,
        Command::Policy => cmd_policy(&client, cli.verbose).await,
        Command::Interactive => cmd_interactive(&client).await,
    };
    std::process::exit(code);
}

fn resolve_config(cli: &Cli) -> TameConfig {
    let mut config = TameConfig::from_env();
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(session_id) = &cli.session_id {
        config.session_id = Some(session_id.clone());
    }
    if let Some(agent_id) = &cli.agent_id {
        config.agent_id = Some(agent_id.clone());
    }
    if let Some(user_id) = &cli.user_id {
        config.user_id = Some(user_id.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_seconds = timeout;
    }
    if cli.bypass {
        config.bypass_mode = true;
    }
    config
}

async fn cmd_status(client: &Client) -> i32 {
    match client.server_status().await {
        Ok(status) => {
            println!("Tame API connection: ok ({})", client.api_url());
            println!("Policy version:      {}", status.policy_version);
            println!("Rules count:         {}", status.rules_count);
            println!(
                "Authentication:      {}",
                if status.auth_enabled {
                    "bearer token required"
                } else {
                    "DISABLED (development mode, all callers accepted)"
                }
            );
            if status.bypass_mode {
                println!("Bypass mode:         ENABLED on the server");
            }
            println!("Session ID:          {}", client.session_id);
            if let Some(agent_id) = client.agent_id() {
                println!("Agent ID:            {agent_id}");
            }
            if let Some(user_id) = client.user_id() {
                println!("User ID:             {user_id}");
            }
            EXIT_ALLOW
        }
        Err(e) => {
            eprintln!("Failed to connect to Tame API: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_test(
    client: &Client,
    tool_name: &str,
    args: Option<&str>,
    dry_run: bool,
    verbose: bool,
) -> i32 {
    let tool_args = match parse_tool_args(args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_ERROR;
        }
    };

    if dry_run {
        return match client.test_policy(tool_name, &tool_args).await {
            Ok(result) => {
                println!("Policy test result (no audit entry written):");
                print_json(&result);
                decision_exit_code(
                    result
                        .get("decision")
                        .and_then(|d| d.get("action"))
                        .and_then(Value::as_str)
                        .unwrap_or("deny"),
                )
            }
            Err(e) => {
                eprintln!("Error testing tool: {e}");
                EXIT_ERROR
            }
        };
    }

    match client
        .enforce(tool_name, tool_args, None, None, None, None)
        .await
    {
        Ok(decision) => {
            print_decision(&decision, verbose);
            decision_exit_code(&decision.decision)
        }
        Err(e) => {
            eprintln!("Error testing tool: {e}");
            EXIT_ERROR
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_enforce(
    client: &Client,
    tool: &str,
    args: Option<&str>,
    metadata: Option<&str>,
    session: Option<&str>,
    agent: Option<&str>,
    user: Option<&str>,
    verbose: bool,
) -> i32 {
    let tool_args = match parse_tool_args(args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_ERROR;
        }
    };
    let metadata = match metadata {
        None => None,
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                eprintln!("Error: invalid JSON in metadata: {e}");
                return EXIT_ERROR;
            }
        },
    };

    match client
        .enforce(tool, tool_args, metadata, session, agent, user)
        .await
    {
        Ok(decision) => {
            print_decision(&decision, verbose);
            decision_exit_code(&decision.decision)
        }
        Err(e) => {
            eprintln!("Error enforcing tool call: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_logs(client: &Client, session_id: Option<&str>, format: &str) -> i32 {
    let session_id = session_id.unwrap_or(&client.session_id);
    let logs = match client.session_entries(session_id).await {
        Ok(logs) => logs,
        Err(ClientError::Api { status: 404, .. }) => {
            println!("No logs found for session {session_id}");
            return EXIT_ALLOW;
        }
        Err(e) => {
            eprintln!("Error getting session logs: {e}");
            return EXIT_ERROR;
        }
    };

    match format {
        "json" => {
            match serde_json::to_value(
                logs.entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "log_id": e.log_id,
                            "seq_index": e.seq_index,
                            "timestamp": e.timestamp,
                            "tool_name": e.tool_name,
                            "decision": e.decision,
                            "rule_name": e.rule_name,
                            "status": e.status,
                            "error_message": e.error_message,
                        })
                    })
                    .collect::<Vec<_>>(),
            ) {
                Ok(value) => print_json(&value),
                Err(e) => {
                    eprintln!("Error: {e}");
                    return EXIT_ERROR;
                }
            }
        }
        "summary" => {
            let allowed = logs.entries.iter().filter(|e| e.decision == "allow").count();
            let denied = logs.entries.iter().filter(|e| e.decision == "deny").count();
            let approve = logs.entries.iter().filter(|e| e.decision == "approve").count();
            print_json(&serde_json::json!({
                "session_id": logs.session_id,
                "total_calls": logs.total_count,
                "allowed": allowed,
                "denied": denied,
                "approval_required": approve,
            }));
        }
        _ => {
            let rows: Vec<Vec<String>> = logs
                .entries
                .iter()
                .map(|e| {
                    vec![
                        format_clock(e.timestamp),
                        e.tool_name.clone(),
                        e.decision.clone(),
                        e.rule_name.clone().unwrap_or_else(|| "-".to_string()),
                        e.status.clone(),
                    ]
                })
                .collect();
            print_table(
                &format!("Session logs ({} entries)", logs.total_count),
                &["Time", "Tool", "Decision", "Rule", "Status"],
                &rows,
            );
        }
    }
    EXIT_ALLOW
}

async fn cmd_policy(client: &Client, verbose: bool) -> i32 {
    match client.policy_info().await {
        Ok(info) => {
            println!("Current policy:");
            println!("  Version:     {}", info.version);
            println!(
                "  Description: {}",
                info.description.as_deref().unwrap_or("(none)")
            );
            println!("  Rules count: {}", info.rules_count);
            println!("  Fingerprint: {}", info.hash);
            println!("  Created at:  {}", format_time(info.created_at));
            println!("  Active:      {}", if info.active { "yes" } else { "no" });
            if verbose {
                println!("\nRules:");
                print_json(&Value::Array(info.rules));
            }
            EXIT_ALLOW
        }
        Err(e) => {
            eprintln!("Error getting policy info: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_interactive(client: &Client) -> i32 {
    println!("tamesdk interactive mode");
    println!("Commands: test <tool> [args], status, policy, logs, help, quit");

    let stdin = std::io::stdin();
    loop {
        print!("tamesdk> ");
        if std::io::stdout().flush().is_err() {
            return EXIT_ERROR;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                return EXIT_ALLOW;
            }
            Ok(_) => {}
        }
        let command = line.trim();

        match command {
            "" => continue,
            "quit" | "exit" | "q" => return EXIT_ALLOW,
            "help" => {
                println!("  test <tool> [args]  enforce a tool call");
                println!("  status              check API status");
                println!("  policy              show the active policy");
                println!("  logs                show this session's logs");
                println!("  quit                leave interactive mode");
            }
            "status" => {
                cmd_status(client).await;
            }
            "policy" => {
                cmd_policy(client, false).await;
            }
            "logs" => {
                cmd_logs(client, None, "table").await;
            }
            other => {
                if let Some(rest) = other.strip_prefix("test ") {
                    let mut parts = rest.splitn(2, ' ');
                    let tool_name = parts.next().unwrap_or_default();
                    let args = parts.next();
                    if tool_name.is_empty() {
                        println!("Usage: test <tool> [args]");
                        continue;
                    }
                    cmd_test(client, tool_name, args, false, true).await;
                } else {
                    println!("Unknown command '{other}'; type 'help'");
                }
            }
        }
    }
}

fn print_decision(decision: &EnforcementDecision, verbose: bool) {
    println!("Decision:       {}", decision.decision.to_uppercase());
    println!("Reason:         {}", decision.reason);
    if let Some(rule_name) = &decision.rule_name {
        println!("Rule:           {rule_name}");
    }
    println!("Policy version: {}", decision.policy_version);
    println!("Log ID:         {}", decision.log_id);
    if verbose {
        println!("Session ID:     {}", decision.session_id);
        println!("Timestamp:      {}", format_time(decision.timestamp));
        if decision.bypass {
            println!("Bypass:         yes");
        }
    }
}

fn decision_exit_code(decision: &str) -> i32 {
    match decision {
        "allow" => EXIT_ALLOW,
        "deny" => EXIT_DENY,
        "approve" => EXIT_APPROVE,
        _ => EXIT_ERROR,
    }
}

/// `--args` accepts a JSON object or comma-separated `key=value` pairs.
fn parse_tool_args(raw: Option<&str>) -> Result<Value, String> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Map::new()));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON in tool args: {e}"));
    }

    let mut map = Map::new();
    for pair in trimmed.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("expected key=value, got '{pair}'"));
        };
        map.insert(
            key.trim().to_string(),
            Value::String(value.trim().to_string()),
        );
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_args_accept_json_and_pairs() {
        assert_eq!(parse_tool_args(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_tool_args(Some(r#"{"path": "/tmp/a", "n": 3}"#)).unwrap(),
            serde_json::json!({"path": "/tmp/a", "n": 3})
        );
        assert_eq!(
            parse_tool_args(Some("path=/tmp/a, mode=ro")).unwrap(),
            serde_json::json!({"path": "/tmp/a", "mode": "ro"})
        );
        assert!(parse_tool_args(Some("no-equals")).is_err());
    }

    #[test]
    fn exit_codes_follow_the_decision() {
        assert_eq!(decision_exit_code("allow"), EXIT_ALLOW);
        assert_eq!(decision_exit_code("deny"), EXIT_DENY);
        assert_eq!(decision_exit_code("approve"), EXIT_APPROVE);
        assert_eq!(decision_exit_code("garbage"), EXIT_ERROR);
    }
}
