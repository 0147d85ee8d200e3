//! Standardized API response types
//!
//! Every endpoint answers with an [`ApiResponse`] envelope. Errors are
//! rendered from [`AppError`] so the failure kind survives to the client as
//! both an HTTP status and a stable `code`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::errors::AppError;
use crate::models::Page;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    error: String,
    timestamp: DateTime<Utc>,
}

/// Paginated collection payload
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit)) as u32
        };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self::new(page.items, page.total, page.page, page.limit)
    }
}

/// HTTP status for each error kind
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation { .. } => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::InvalidState { .. } => StatusCode::CONFLICT,
        AppError::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Database(_)
        | AppError::Repository(_)
        | AppError::Configuration { .. }
        | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {}", self);
        }

        (
            status,
            Json(ErrorBody {
                success: false,
                code: self.code(),
                error: self.to_string(),
                timestamp: Utc::now(),
            }),
        )
            .into_response()
    }
}

/// 200 with the data wrapped in the envelope
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

pub fn paginated<T: Serialize>(page: Page<T>) -> Response {
    ok(PaginatedResponse::from(page))
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginated_response_pages() {
        let response = PaginatedResponse::new(vec![1, 2, 3], 25, 2, 10);
        assert_eq!(response.total_pages, 3);
        assert!(response.has_next);
        assert!(response.has_previous);

        let last = PaginatedResponse::new(vec![1], 21, 3, 10);
        assert!(!last.has_next);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&AppError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&AppError::not_found("job", 1)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&AppError::invalid_state("x")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&AppError::pool_exhausted("x")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
