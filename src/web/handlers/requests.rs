//! Request queue endpoints, including the worker-facing claim/report flow

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{NewRequest, Outcome, ResponseRecord, WorkerCapabilities};
use crate::web::{
    extractors::{PaginationParams, RequestListParams},
    responses::{created, ok, paginated},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PriorityPayload {
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct InProgressPayload {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DonePayload {
    pub response: ResponseRecord,
}

#[derive(Debug, Deserialize)]
pub struct ErrorPayload {
    pub reason: String,
    #[serde(default)]
    pub increment_retry: bool,
    #[serde(default)]
    pub response: Option<ResponseRecord>,
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<RequestListParams>,
) -> Result<Response, AppError> {
    let page = state
        .queue()
        .list(&params.into(), &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

pub async fn enqueue_request(
    State(state): State<AppState>,
    Json(payload): Json<NewRequest>,
) -> Result<Response, AppError> {
    let request = state.queue().enqueue(payload).await?;
    state.jobs().recompute_status(request.job_id).await?;
    Ok(created(request))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.queue().get(id).await?))
}

/// `data` is `null` when nothing is dispatchable; 503 on proxy exhaustion
pub async fn claim_request(
    State(state): State<AppState>,
    Json(capabilities): Json<WorkerCapabilities>,
) -> Result<Response, AppError> {
    if capabilities.worker_id.trim().is_empty() {
        return Err(AppError::validation("worker_id must not be empty"));
    }
    Ok(ok(state.engine.claim_next(&capabilities).await?))
}

pub async fn set_priority(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<PriorityPayload>,
) -> Result<Response, AppError> {
    Ok(ok(state.queue().set_priority(id, payload.priority).await?))
}

pub async fn mark_in_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<InProgressPayload>,
) -> Result<Response, AppError> {
    Ok(ok(state
        .engine
        .mark_in_progress(id, &payload.worker_id)
        .await?))
}

pub async fn mark_done(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<DonePayload>,
) -> Result<Response, AppError> {
    let outcome = Outcome::success(payload.response);
    Ok(ok(state.engine.complete(id, &outcome).await?))
}

pub async fn mark_error(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ErrorPayload>,
) -> Result<Response, AppError> {
    let outcome = Outcome::failure(payload.reason, payload.increment_retry, payload.response);
    Ok(ok(state.engine.complete(id, &outcome).await?))
}

pub async fn retry_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.engine.retry(id).await?))
}

pub async fn list_responses(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.queue().responses(id).await?))
}
