//! Proxy pool HTTP handlers

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{NewProxy, ProxyCriteria};
use crate::web::{
    extractors::{PaginationParams, ProxyListParams},
    responses::{created, no_content, ok, paginated},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ActivePayload {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct FailurePayload {
    pub reason: String,
}

pub async fn list_proxies(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<ProxyListParams>,
) -> Result<Response, AppError> {
    let page = state
        .proxies()
        .list(&params.into(), &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

pub async fn create_proxy(
    State(state): State<AppState>,
    Json(payload): Json<NewProxy>,
) -> Result<Response, AppError> {
    Ok(created(state.proxies().add(payload).await?))
}

pub async fn get_proxy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.proxies().get(id).await?))
}

/// Refused with 409 while requests are in flight through the proxy
pub async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.proxies().delete(id).await?;
    Ok(no_content())
}

pub async fn set_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ActivePayload>,
) -> Result<Response, AppError> {
    Ok(ok(state.proxies().set_active(id, payload.active).await?))
}

pub async fn record_success(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.proxies().record_success(id).await?))
}

pub async fn record_failure(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<FailurePayload>,
) -> Result<Response, AppError> {
    Ok(ok(state.proxies().record_failure(id, &payload.reason).await?))
}

pub async fn reset_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.proxies().reset_stats(id).await?))
}

pub async fn acquire_proxy(
    State(state): State<AppState>,
    payload: Option<Json<ProxyCriteria>>,
) -> Result<Response, AppError> {
    let criteria = payload.map(|Json(c)| c).unwrap_or_default();
    Ok(ok(state.proxies().acquire(&criteria).await?))
}
