//! Background retention sweeper.
//!
//! Runs on a fixed interval, deleting sessions whose retention window has
//! expired. Per-session failures are reported and skipped; the sweeper
//! itself never exits on a store error.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::app::AppState;
use crate::module::session::crud;
use crate::service::metrics_service;

pub async fn run_sweeper(state: AppState) {
    let interval = state.config.sweeper_interval_seconds.max(1);
    info!(interval_seconds = interval, "retention sweeper started");
    loop {
        sleep(Duration::from_secs(interval)).await;
        match crud::sweep_expired(&state, false).await {
            Ok(report) => {
                metrics_service::inc_sweeps_completed();
                metrics_service::add_sessions_deleted(report.sessions_deleted);
                if report.sessions_deleted > 0 || !report.failures.is_empty() {
                    info!(
                        sessions_deleted = report.sessions_deleted,
                        entries_deleted = report.entries_deleted,
                        failures = report.failures.len(),
                        "retention sweep completed"
                    );
                }
            }
            Err(e) => {
                warn!(error_code = e.code, reason = %e.message, "retention sweep failed");
            }
        }
    }
}
