use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};

use crate::errors::AppError;
use crate::models::NewProject;
use crate::web::{
    extractors::PaginationParams,
    responses::{created, no_content, ok, paginated},
    AppState,
};

pub async fn list_projects(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Response, AppError> {
    let page = state
        .catalog
        .list_projects(&pagination.page_request())
        .await?;
    Ok(paginated(page))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<NewProject>,
) -> Result<Response, AppError> {
    Ok(created(state.catalog.create_project(payload).await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.catalog.get_project(id).await?))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.catalog.delete_project(id).await?;
    Ok(no_content())
}
