#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Days, NaiveDate};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use stockcast_api::{
    config::AppConfig,
    db,
    entities::{forecast, product},
    repositories::{
        product_repository::NewProduct, AlertRepository, ForecastRepository, ProductRepository,
        SalesRepository,
    },
    services::alerts::AlertService,
    AppState,
};
use tower::ServiceExt;

/// Configuration for an in-memory SQLite database on a single connection,
/// so every query sees the same schema.
pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        environment: "test".to_string(),
        db_max_connections: 1,
        db_min_connections: 1,
        ..AppConfig::default()
    }
}

/// Fresh migrated database
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let cfg = test_config();
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");
    Arc::new(pool)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub async fn seed_product(
    db: &Arc<DatabaseConnection>,
    name: &str,
    stock_level: i32,
    reorder_threshold: i32,
) -> product::Model {
    ProductRepository::new(db.clone())
        .create(NewProduct {
            name: name.to_string(),
            category: Some("test".to_string()),
            sku: None,
            stock_level,
            reorder_threshold,
        })
        .await
        .expect("seed product")
}

/// `days` consecutive daily sales ending the day before `today`
pub async fn seed_daily_sales(
    db: &Arc<DatabaseConnection>,
    product_id: i32,
    today: NaiveDate,
    days: u64,
    quantity: impl Fn(u64) -> f64,
) {
    let start = today - Days::new(days);
    let entries: Vec<(NaiveDate, f64)> = (0..days)
        .map(|i| (start + Days::new(i), quantity(i)))
        .collect();
    SalesRepository::new(db.clone())
        .upsert_daily(product_id, &entries)
        .await
        .expect("seed sales");
}

pub async fn seed_forecast(
    db: &Arc<DatabaseConnection>,
    product_id: i32,
    date: NaiveDate,
    predicted_qty: f64,
) -> forecast::Model {
    forecast::ActiveModel {
        product_id: Set(product_id),
        date: Set(date),
        predicted_qty: Set(predicted_qty),
        lower_bound: Set(Some(0.0)),
        upper_bound: Set(Some(predicted_qty * 2.0)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .expect("seed forecast")
}

pub fn alert_service(db: &Arc<DatabaseConnection>) -> AlertService {
    AlertService::new(
        ProductRepository::new(db.clone()),
        ForecastRepository::new(db.clone()),
        AlertRepository::new(db.clone()),
    )
}

/// Router plus state over a fresh database
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let db = setup_db().await;
        let state = AppState::new(db, cfg).expect("build app state");
        let router = stockcast_api::build_router(state.clone());
        Self { router, state }
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.state.db
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and decodes the JSON response body
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is json")
        };
        (status, json)
    }
}
