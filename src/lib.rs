//! Stockcast API Library
//!
//! Inventory demand forecasting and reorder alerting: per-product forecasts
//! fitted from daily sales history, and low-stock alerts raised when the
//! projected stock falls below a product's reorder threshold.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod migrator;
pub mod ml;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

/// Upper bound on a single HTTP request; forecast generation runs in the background
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
    ) -> Result<Self, errors::ServiceError> {
        let services = handlers::AppServices::new(db.clone(), &config)?;
        Ok(Self {
            db,
            config,
            services,
        })
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/products", handlers::products::product_routes())
        .nest("/sales", handlers::sales::sales_routes())
        .nest("/forecasts", handlers::forecasts::forecast_routes())
        .nest("/alerts", handlers::alerts::alert_routes())
}

/// Full application router with tracing, CORS and timeout layers
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        .with_state(state)
}
