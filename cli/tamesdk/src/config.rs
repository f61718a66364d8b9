use std::env;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Client configuration, resolved from `TAME_*` environment variables and
/// then overridden by command-line flags. Built once at startup and passed
/// into the client; there is no global configuration state.
#[derive(Debug, Clone)]
pub struct TameConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub timeout_seconds: u64,
    pub bypass_mode: bool,
}

impl Default for TameConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            session_id: None,
            agent_id: None,
            user_id: None,
            timeout_seconds: 30,
            bypass_mode: false,
        }
    }
}

impl TameConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env::var("TAME_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: read_optional("TAME_API_KEY"),
            session_id: read_optional("TAME_SESSION_ID"),
            agent_id: read_optional("TAME_AGENT_ID"),
            user_id: read_optional("TAME_USER_ID"),
            timeout_seconds: env::var("TAME_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            bypass_mode: read_bool("TAME_BYPASS_MODE"),
        }
    }
}

fn read_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn read_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_localhost() {
        let config = TameConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_seconds, 30);
        assert!(!config.bypass_mode);
        assert!(config.api_key.is_none());
    }
}
