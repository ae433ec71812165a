pub mod alerts;
pub mod common;
pub mod forecasts;
pub mod health;
pub mod products;
pub mod sales;

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::ledger::LedgerClient;
use crate::repositories::{AlertRepository, ForecastRepository, ProductRepository, SalesRepository};
use crate::services::{
    alerts::AlertService,
    forecast_jobs::ForecastJobRegistry,
    forecasting::ForecastingService,
    sales_import::{SalesImportService, SalesSource},
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub products: ProductRepository,
    pub sales: SalesRepository,
    pub forecasting: Arc<ForecastingService>,
    pub forecast_jobs: Arc<ForecastJobRegistry>,
    pub alerts: Arc<AlertService>,
    /// Present only when a ledger is configured
    pub sales_import: Option<Arc<SalesImportService>>,
}

impl AppServices {
    /// Wires repositories and services over one connection pool
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Result<Self, ServiceError> {
        let products = ProductRepository::new(db_pool.clone());
        let sales = SalesRepository::new(db_pool.clone());
        let forecasts = ForecastRepository::new(db_pool.clone());
        let alerts = AlertRepository::new(db_pool);

        let forecasting =
            ForecastingService::from_config(products.clone(), sales.clone(), forecasts.clone(), config);
        let alert_service = AlertService::new(products.clone(), forecasts, alerts);

        let sales_import = match &config.ledger {
            Some(ledger) => {
                let client = LedgerClient::new(ledger.clone())?;
                info!(company_id = %ledger.company_id, "Sales ledger import enabled");
                let source: Arc<dyn SalesSource> = Arc::new(client);
                Some(Arc::new(SalesImportService::new(
                    products.clone(),
                    sales.clone(),
                    source,
                )))
            }
            None => None,
        };

        Ok(Self {
            products,
            sales,
            forecasting: Arc::new(forecasting),
            forecast_jobs: Arc::new(ForecastJobRegistry::new()),
            alerts: Arc::new(alert_service),
            sales_import,
        })
    }
}
