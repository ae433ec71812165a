use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::str::FromStr;

use super::common::success_response;
use crate::entities::stock_alert::AlertStatus;
use crate::errors::ServiceError;
use crate::repositories::alert_repository::AlertFilter;
use crate::repositories::Page;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub product_id: Option<i32>,
    pub status: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertStatusRequest {
    pub status: String,
}

fn parse_status(value: &str) -> Result<AlertStatus, ServiceError> {
    AlertStatus::from_str(value.trim()).map_err(|_| {
        ServiceError::BadRequest(format!(
            "invalid alert status '{}': expected new, acknowledged or resolved",
            value
        ))
    })
}

/// Evaluates every product, records new alerts and returns the candidates
pub async fn check_alerts(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let report = state.services.alerts.check_alerts().await?;
    Ok(success_response(report))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Response, ServiceError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let filter = AlertFilter {
        product_id: query.product_id,
        status,
    };
    let alerts = state
        .services
        .alerts
        .list(&filter, Page::new(query.skip, query.limit))
        .await?;
    Ok(success_response(alerts))
}

pub async fn update_alert_status(
    State(state): State<AppState>,
    Path(alert_id): Path<i32>,
    Json(request): Json<UpdateAlertStatusRequest>,
) -> Result<Response, ServiceError> {
    let status = parse_status(&request.status)?;
    let alert = state.services.alerts.update_status(alert_id, status).await?;
    Ok(success_response(alert))
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/check", get(check_alerts))
        .route("/:alert_id/status", put(update_alert_status))
}
