use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::crud;
use super::schema::{
    StatusResponse, ToolCallRequest, ToolCallResponse, UpdateResultQuery, UpdateResultRequest,
    UpdateResultResponse,
};
use crate::app::AppState;
use crate::errors::AppError;
use crate::module::policy::crud as policy_crud;
use crate::service::auth_service::require_bearer;
use crate::service::events_service::wire_message;
use crate::service::metrics_service;

pub async fn enforce(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(crud::enforce(&state, req).await?))
}

pub async fn update_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<UpdateResultQuery>,
    Json(req): Json<UpdateResultRequest>,
) -> Result<Json<UpdateResultResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(Json(
        crud::update_result(&state, &session_id, &query.log_id, req).await?,
    ))
}

/// Service status: active policy, auth/bypass mode, process counters.
/// The CLI `status` command surfaces the accept-all development mode from
/// here.
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    require_bearer(&state.config, &headers)?;
    let snapshot = policy_crud::current_snapshot(&state)?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        policy_version: snapshot.version.clone(),
        rules_count: snapshot.rules.len(),
        auth_enabled: state.config.auth_enabled(),
        bypass_mode: state.config.bypass_mode,
        metrics: metrics_service::snapshot(),
    }))
}

pub async fn ws_all_sessions(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, None)))
}

pub async fn ws_one_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    require_bearer(&state.config, &headers)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, Some(session_id))))
}

/// Forward decision/result events to one subscriber, optionally filtered to
/// a single session. The broadcast channel is lossy by design: a lagging
/// subscriber drops its oldest events and reconciles by paginating the
/// session log.
async fn handle_socket(socket: WebSocket, state: AppState, session_filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();
    debug!(session_filter = session_filter.as_deref().unwrap_or("*"), "subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if session_filter
                        .as_deref()
                        .is_some_and(|wanted| wanted != event.session_id)
                    {
                        continue;
                    }
                    let message = match wire_message(&event) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "event encode failed; skipped");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(message)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    metrics_service::add_events_dropped(skipped);
                    debug!(skipped, "subscriber lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Subscribers only listen; anything else is ignored.
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("subscriber disconnected");
}
