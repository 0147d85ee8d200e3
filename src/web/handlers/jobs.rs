use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::JobUpdate;
use crate::web::{
    extractors::{JobListParams, PaginationParams},
    responses::{created, no_content, ok, paginated},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateJobPayload {
    pub spider_id: i64,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<JobListParams>,
) -> Result<Response, AppError> {
    let page = state
        .jobs()
        .list(&params.into(), &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

/// Snapshot the spider and seed one request per start URL
pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobPayload>,
) -> Result<Response, AppError> {
    Ok(created(state.jobs().create_job(payload.spider_id).await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.jobs().get(id).await?))
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<JobUpdate>,
) -> Result<Response, AppError> {
    Ok(ok(state.jobs().update(id, &payload).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.jobs().delete(id).await?;
    Ok(no_content())
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.engine.cancel_job(id).await?))
}

pub async fn job_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.jobs().progress(id).await?))
}

pub async fn recompute_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.jobs().recompute_status(id).await?))
}
