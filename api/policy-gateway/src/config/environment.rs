use std::env;

pub const DEV_HMAC_SECRET: &str = "dev-audit-chain-secret";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    /// Server-side secret keying the audit log hash chain.
    pub audit_hmac_secret: String,
    /// Shared-secret bearer token; `None` means development accept-all mode.
    pub api_key: Option<String>,
    /// Short-circuit every enforcement to ALLOW while still auditing.
    pub bypass_mode: bool,
    /// Policy bundle tracked by reload; loaded at startup when no version is active.
    pub policy_file: Option<String>,
    pub mongodb_url: Option<String>,
    pub mongodb_database: Option<String>,
    pub redis_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub sweeper_enabled: bool,
    pub sweeper_interval_seconds: u64,
    pub event_buffer_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            audit_hmac_secret: env::var("AUDIT_HMAC_SECRET")
                .unwrap_or_else(|_| DEV_HMAC_SECRET.to_string()),
            api_key: env::var("API_KEY").ok().filter(|v| !v.is_empty()),
            bypass_mode: read_optional_bool("BYPASS_MODE", false),
            policy_file: env::var("POLICY_FILE").ok().filter(|v| !v.is_empty()),
            mongodb_url: env::var("MONGODB_URL").ok(),
            mongodb_database: env::var("MONGODB_DATABASE").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            request_timeout_seconds: read_optional_u64("REQUEST_TIMEOUT_SECONDS", 30),
            sweeper_enabled: read_optional_bool("RETENTION_SWEEPER_ENABLED", true),
            sweeper_interval_seconds: read_optional_u64("RETENTION_SWEEP_INTERVAL_SECONDS", 3600),
            event_buffer_size: read_optional_u64("EVENT_BUFFER_SIZE", 256) as usize,
        })
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn load_dotenv_layers() {
    for path in [".env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path(path);
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
