use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::ServiceError;
use crate::repositories::Page;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// `skip`/`limit` query parameters of list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl PaginationParams {
    pub fn page(&self) -> Page {
        Page::new(self.skip, self.limit)
    }
}

/// Optional inclusive date range
#[derive(Debug, Default, Deserialize)]
pub struct DateRangeParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DateRangeParams {
    pub fn check(&self) -> Result<(), ServiceError> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start > end => Err(ServiceError::BadRequest(format!(
                "start_date {} is after end_date {}",
                start, end
            ))),
            _ => Ok(()),
        }
    }
}
