use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::models::NewSession;
use crate::web::{
    extractors::{PaginationParams, SessionListParams},
    responses::{created, no_content, ok, paginated, ApiResponse},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub spider: i64,
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendPayload {
    pub hours: i64,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<SessionListParams>,
) -> Result<Response, AppError> {
    let page = state
        .sessions()
        .list(&params.into(), &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

/// Creates or replaces the `(spider, label)` session
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<NewSession>,
) -> Result<Response, AppError> {
    Ok(created(state.sessions().create(payload).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.sessions().get_by_id(id).await?))
}

/// Valid session for a spider and label; `data` is `null` when there is none
pub async fn lookup_session(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Response, AppError> {
    Ok(ok(state
        .sessions()
        .get(params.spider, params.label.as_deref())
        .await?))
}

pub async fn extend_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ExtendPayload>,
) -> Result<Response, AppError> {
    Ok(ok(state
        .sessions()
        .extend_validity(id, payload.hours)
        .await?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.sessions().delete(id).await?;
    Ok(no_content())
}

pub async fn cleanup_sessions(State(state): State<AppState>) -> Result<Response, AppError> {
    let removed = state.sessions().cleanup_expired().await?;
    Ok(Json(
        ApiResponse::success(json!({ "removed": removed }))
            .with_message(format!("Removed {removed} expired sessions")),
    )
    .into_response())
}
