use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::Router;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};

use crate::config::environment::AppConfig;
use crate::errors::AppError;
use crate::infra::InfraClients;
use crate::module::policy::crud::PolicyStore;
use crate::module::session::crud::AuditStore;
use crate::module::{compliance, enforcement, policy, session};
use crate::service::events_service::EventBus;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub policies: Arc<PolicyStore>,
    pub audit: Arc<AuditStore>,
    pub events: EventBus,
    pub infra: Option<InfraClients>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: Option<InfraClients>) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        Self {
            config,
            policies: Arc::new(PolicyStore::default()),
            audit: Arc::new(AuditStore::default()),
            events,
            infra,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_seconds.max(1));
    Router::new()
        .merge(enforcement::route::register_routes())
        .merge(session::route::register_routes())
        .merge(policy::route::register_routes())
        .merge(compliance::route::register_routes())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}

async fn handle_middleware_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::internal("DEADLINE_EXCEEDED", "request deadline exceeded")
    } else {
        AppError::internal("SERVER", format!("unhandled middleware error: {err}"))
    }
}
