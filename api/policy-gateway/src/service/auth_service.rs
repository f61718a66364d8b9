use axum::http::HeaderMap;

use crate::config::environment::AppConfig;
use crate::errors::AppError;

/// Reject callers lacking the configured bearer token.
///
/// When no token is configured the service runs in development accept-all
/// mode; the startup log and the status endpoint both surface that state.
pub fn require_bearer(config: &AppConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &config.api_key else {
        return Ok(());
    };

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::unauthorized("UNAUTHENTICATED", "missing Authorization bearer token")
        })?;

    if presented != expected {
        return Err(AppError::unauthorized(
            "UNAUTHENTICATED",
            "invalid Authorization bearer token",
        ));
    }
    Ok(())
}
