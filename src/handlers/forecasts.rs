use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::common::{success_response, validate_input, DateRangeParams, PaginationParams};
use crate::errors::ServiceError;
use crate::ml::Frequency;
use crate::repositories::forecast_repository::ForecastFilter;
use crate::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct GenerateForecastRequest {
    /// Products to forecast; all products when empty or absent
    pub product_ids: Option<Vec<i32>>,
    #[validate(range(min = 1, max = 3650))]
    pub periods: Option<u32>,
    #[serde(default)]
    pub frequency: Frequency,
}

#[derive(Debug, Deserialize)]
pub struct ListForecastsQuery {
    pub product_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

/// Starts a background generation run and answers immediately
pub async fn generate_forecasts(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    // An empty body means "all products with default settings"
    let request: GenerateForecastRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateForecastRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid request body: {}", e)))?
    };
    validate_input(&request)?;

    let periods = request
        .periods
        .unwrap_or(state.config.forecast_default_periods);
    let job_id = state.services.forecast_jobs.submit(
        state.services.forecasting.clone(),
        request.product_ids,
        periods,
        request.frequency,
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "job_id": job_id,
            "message": format!(
                "Forecast generation started for {} {} periods",
                periods, request.frequency
            ),
        })),
    )
        .into_response())
}

pub async fn get_forecast_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let job = state
        .services
        .forecast_jobs
        .get(&job_id)
        .ok_or_else(|| ServiceError::NotFound(format!("Forecast job {} not found", job_id)))?;
    Ok(success_response(job))
}

pub async fn list_forecasts(
    State(state): State<AppState>,
    Query(query): Query<ListForecastsQuery>,
) -> Result<Response, ServiceError> {
    let range = DateRangeParams {
        start_date: query.start_date,
        end_date: query.end_date,
    };
    range.check()?;
    let filter = ForecastFilter {
        product_id: query.product_id,
        start_date: range.start_date,
        end_date: range.end_date,
    };
    let page = PaginationParams {
        skip: query.skip,
        limit: query.limit,
    }
    .page();
    let rows = state
        .services
        .forecasting
        .forecasts()
        .query(&filter, page)
        .await?;
    Ok(success_response(rows))
}

pub async fn get_product_forecast(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    Query(range): Query<DateRangeParams>,
) -> Result<Response, ServiceError> {
    range.check()?;
    if state.services.products.find_by_id(product_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Product {} not found",
            product_id
        )));
    }

    let rows = state
        .services
        .forecasting
        .forecasts()
        .for_product(product_id, range.start_date, range.end_date)
        .await?;
    Ok(success_response(rows))
}

pub fn forecast_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_forecasts))
        .route("/generate", post(generate_forecasts))
        .route("/jobs/:job_id", get(get_forecast_job))
        .route("/:product_id", get(get_product_forecast))
}
