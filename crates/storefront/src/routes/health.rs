//! Health check handlers.

use axum::extract::State;

use crate::error::Result;
use crate::state::AppState;

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies the cart storage is usable. Returns 503 Service Unavailable
/// otherwise.
pub async fn readiness(State(state): State<AppState>) -> Result<&'static str> {
    state.storage().check()?;
    Ok("ok")
}
