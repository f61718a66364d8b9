use axum::routing::{get, post};
use axum::Router;

use super::controller;
use crate::app::AppState;

pub fn register_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/policy/current", get(controller::get_current_policy))
        .route("/api/v1/policy/test", get(controller::test_policy))
        .route("/api/v1/policy/validate", post(controller::validate_policy))
        .route("/api/v1/policy/create", post(controller::create_policy))
        .route("/api/v1/policy/reload", post(controller::reload_policy))
        .route("/api/v1/policy/versions", get(controller::list_versions))
}
