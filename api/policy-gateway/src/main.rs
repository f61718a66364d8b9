use policy_gateway::app::{build_router, AppState};
use policy_gateway::config::environment::{AppConfig, DEV_HMAC_SECRET};
use policy_gateway::infra::init_infra;
use policy_gateway::module::policy::crud as policy_crud;
use policy_gateway::module::session::crud as session_crud;
use policy_gateway::service::retention_service;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };
    let bind_addr = format!("{}:{}", config.api_host, config.api_port);

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            std::process::exit(1);
        }
    };

    info!(
        env = %config.rust_env,
        host = %config.api_host,
        port = config.api_port,
        "policy-gateway started"
    );

    if !config.auth_enabled() {
        warn!("API_KEY is not set; accepting all callers (development mode)");
    }
    if config.audit_hmac_secret == DEV_HMAC_SECRET {
        warn!("AUDIT_HMAC_SECRET is not set; audit chain uses the built-in development secret");
    }
    if config.bypass_mode {
        warn!("BYPASS_MODE is enabled; every decision short-circuits to allow");
        if config.mongodb_url.is_some() {
            warn!("bypass mode with a persistent audit store is not meant for production use");
        }
    }

    let infra = match init_infra(&config).await {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; running without external storage");
            None
        }
    };

    let state = AppState::new(config, infra);

    if let Err(e) = session_crud::warm_from_storage(&state).await {
        error!(error_code = e.code, reason = %e.message, "audit store warm-up failed");
        std::process::exit(1);
    }
    if let Err(e) = policy_crud::init_active_policy(&state).await {
        error!(error_code = e.code, reason = %e.message, "policy store init failed");
        std::process::exit(1);
    }

    if state.config.sweeper_enabled {
        let sweeper_state = state.clone();
        tokio::spawn(async move {
            retention_service::run_sweeper(sweeper_state).await;
        });
    }

    let app = build_router(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
