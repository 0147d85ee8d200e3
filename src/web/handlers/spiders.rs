use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};

use crate::errors::AppError;
use crate::models::{NewSpider, SpiderUpdate};
use crate::web::{
    extractors::{PaginationParams, SpiderListParams},
    responses::{created, no_content, ok, paginated},
    AppState,
};

pub async fn list_spiders(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<SpiderListParams>,
) -> Result<Response, AppError> {
    let page = state
        .catalog
        .list_spiders(params.project, &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

pub async fn create_spider(
    State(state): State<AppState>,
    Json(payload): Json<NewSpider>,
) -> Result<Response, AppError> {
    Ok(created(state.catalog.create_spider(payload).await?))
}

pub async fn get_spider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.catalog.get_spider(id).await?))
}

pub async fn update_spider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<SpiderUpdate>,
) -> Result<Response, AppError> {
    Ok(ok(state.catalog.update_spider(id, payload).await?))
}

pub async fn delete_spider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.catalog.delete_spider(id).await?;
    Ok(no_content())
}
