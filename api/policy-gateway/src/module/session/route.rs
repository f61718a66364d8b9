use axum::routing::{get, post};
use axum::Router;

use super::controller;
use crate::app::AppState;

pub fn register_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/sessions", get(controller::list_sessions))
        .route("/api/v1/sessions/export", get(controller::export_sessions))
        .route("/api/v1/sessions/bulk/archive", post(controller::bulk_archive))
        .route(
            "/api/v1/sessions/:session_id",
            get(controller::get_session_entries).delete(controller::delete_session),
        )
        .route(
            "/api/v1/sessions/:session_id/summary",
            get(controller::get_session_summary),
        )
        .route(
            "/api/v1/sessions/:session_id/archive",
            post(controller::archive_session),
        )
}
