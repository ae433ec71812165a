use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::{Validate, ValidationError};

use super::common::{created_response, success_response, validate_input, DateRangeParams};
use crate::errors::ServiceError;
use crate::services::sales_import::merge_daily;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesEntry {
    pub date: NaiveDate,
    pub quantity: f64,
}

fn validate_entries(entries: &Vec<SalesEntry>) -> Result<(), ValidationError> {
    if entries
        .iter()
        .all(|e| e.quantity.is_finite() && e.quantity >= 0.0)
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("quantity");
        err.message = Some("quantities must be finite and non-negative".into());
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordSalesRequest {
    pub product_id: i32,
    #[validate(length(min = 1, max = 10000), custom = "validate_entries")]
    pub entries: Vec<SalesEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ImportSalesRequest {
    pub product_ids: Option<Vec<i32>>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

pub async fn get_sales(
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
        .sales
        .list_range(product_id, range.start_date, range.end_date)
        .await?;
    Ok(success_response(rows))
}

/// Records daily quantities; entries for the same day are summed and an
/// existing day is overwritten
pub async fn record_sales(
    State(state): State<AppState>,
    Json(request): Json<RecordSalesRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    if state
        .services
        .products
        .find_by_id(request.product_id)
        .await?
        .is_none()
    {
        return Err(ServiceError::NotFound(format!(
            "Product {} not found",
            request.product_id
        )));
    }

    let days = merge_daily(request.entries.iter().map(|e| (e.date, e.quantity)));
    let written = state
        .services
        .sales
        .upsert_daily(request.product_id, &days)
        .await?;

    Ok(created_response(json!({
        "product_id": request.product_id,
        "days": written,
    })))
}

/// Pulls sales history from the external ledger
pub async fn import_sales(
    State(state): State<AppState>,
    Json(request): Json<ImportSalesRequest>,
) -> Result<Response, ServiceError> {
    let importer = state.services.sales_import.as_ref().ok_or_else(|| {
        ServiceError::ServiceUnavailable("sales ledger is not configured".to_string())
    })?;

    let report = importer
        .import(request.product_ids, request.start_date, request.end_date)
        .await?;
    Ok(success_response(report))
}

pub fn sales_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(record_sales))
        .route("/import", post(import_sales))
        .route("/:product_id", get(get_sales))
}
