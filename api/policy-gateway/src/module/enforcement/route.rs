use axum::routing::{get, post};
use axum::Router;

use super::controller;
use crate::app::AppState;

pub fn register_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/enforce", post(controller::enforce))
        .route(
            "/api/v1/enforce/:session_id/result",
            post(controller::update_result),
        )
        .route("/api/v1/status", get(controller::status))
        .route("/ws", get(controller::ws_all_sessions))
        .route("/ws/:session_id", get(controller::ws_one_session))
}
