use axum::{extract::State, response::Response};
use serde_json::json;

use crate::errors::AppError;
use crate::web::{responses::ok, AppState};

/// Liveness plus a database round-trip
pub async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    sqlx::query("SELECT 1").execute(&state.database.pool()).await?;
    Ok(ok(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": state.clock.now(),
    })))
}
