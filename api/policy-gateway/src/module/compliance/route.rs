use axum::routing::{get, post};
use axum::Router;

use super::controller;
use crate::app::AppState;

pub fn register_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/compliance/report/generate",
            get(controller::generate_report_get).post(controller::generate_report_post),
        )
        .route(
            "/api/v1/compliance/retention/status",
            get(controller::retention_status),
        )
        .route(
            "/api/v1/compliance/retention/cleanup",
            post(controller::retention_cleanup),
        )
        .route(
            "/api/v1/compliance/integrity/verify",
            get(controller::verify_integrity),
        )
}
