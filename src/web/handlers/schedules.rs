use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use chrono::Duration;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{NewSchedule, ScheduleUpdate};
use crate::web::{
    extractors::{PaginationParams, ScheduleListParams},
    responses::{created, no_content, ok, paginated},
    AppState,
};

const DEFAULT_UPCOMING_HOURS: i64 = 24;
const MAX_UPCOMING_HOURS: i64 = 24 * 366;

#[derive(Debug, Deserialize)]
pub struct UpcomingParams {
    pub hours: Option<i64>,
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(params): Query<ScheduleListParams>,
) -> Result<Response, AppError> {
    let page = state
        .scheduler
        .list(&params.into(), &pagination.page_request())
        .await?;
    Ok(paginated(page))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(payload): Json<NewSchedule>,
) -> Result<Response, AppError> {
    Ok(created(state.scheduler.create(payload).await?))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.get(id).await?))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ScheduleUpdate>,
) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.update(id, &payload).await?))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.scheduler.delete(id).await?;
    Ok(no_content())
}

pub async fn enable_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.enable(id).await?))
}

pub async fn disable_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.disable(id).await?))
}

pub async fn mark_executed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.mark_executed(id, state.clock.now()).await?))
}

pub async fn list_due(State(state): State<AppState>) -> Result<Response, AppError> {
    Ok(ok(state.scheduler.list_due(state.clock.now()).await?))
}

pub async fn list_upcoming(
    State(state): State<AppState>,
    Query(params): Query<UpcomingParams>,
) -> Result<Response, AppError> {
    let hours = params.hours.unwrap_or(DEFAULT_UPCOMING_HOURS);
    if !(1..=MAX_UPCOMING_HOURS).contains(&hours) {
        return Err(AppError::validation(format!(
            "hours must be within 1..={MAX_UPCOMING_HOURS}"
        )));
    }
    Ok(ok(state
        .scheduler
        .list_upcoming(state.clock.now(), Duration::hours(hours))
        .await?))
}
