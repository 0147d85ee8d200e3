use axum::{extract::State, response::Response};

use crate::errors::AppError;
use crate::web::{responses::ok, AppState};

pub async fn get_stats(State(state): State<AppState>) -> Result<Response, AppError> {
    Ok(ok(state.stats.snapshot().await?))
}
