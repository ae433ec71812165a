use chrono::{Days, NaiveDate, Utc};
use metrics::counter;
use sea_orm::{DatabaseTransaction, TransactionTrait};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::entities::product::Model as ProductModel;
use crate::entities::stock_alert::{AlertStatus, AlertType, Model as AlertModel};
use crate::errors::ServiceError;
use crate::ml::forecasting::round2;
use crate::repositories::alert_repository::AlertFilter;
use crate::repositories::{AlertRepository, ForecastRepository, Page, ProductRepository};

/// Usage window is `[today, today + ALERT_WINDOW_DAYS]`, inclusive on both ends
pub const ALERT_WINDOW_DAYS: u64 = 7;

/// A product projected to fall below its reorder threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertCandidate {
    pub product_id: i32,
    pub product_name: String,
    pub current_stock: i32,
    #[serde(rename = "forecasted_usage_next_7_days")]
    pub forecasted_usage: f64,
    #[serde(rename = "min_expected_stock_next_7_days")]
    pub min_expected_stock: f64,
    pub reorder_threshold: i32,
}

/// Counts from writing a batch of candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub created: usize,
    pub already_open: usize,
}

/// Outcome of an alert check. Candidates are returned even when persisting failed.
#[derive(Debug, Clone, Serialize)]
pub struct AlertCheckReport {
    pub candidates: Vec<AlertCandidate>,
    pub created: usize,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Projects stock from current level minus forecast usage.
/// Usage and projection are rounded to cents before the strict comparison.
pub fn evaluate_product(product: &ProductModel, usage: f64) -> Option<AlertCandidate> {
    let usage = round2(usage);
    let min_expected_stock = round2(f64::from(product.stock_level) - usage);

    (min_expected_stock < f64::from(product.reorder_threshold)).then(|| AlertCandidate {
        product_id: product.id,
        product_name: product.name.clone(),
        current_stock: product.stock_level,
        forecasted_usage: usage,
        min_expected_stock,
        reorder_threshold: product.reorder_threshold,
    })
}

pub fn format_alert_message(candidate: &AlertCandidate) -> String {
    format!(
        "Product {} (ID: {}) is forecasted to drop below reorder threshold ({}). \
         Current: {:.2}, Forecasted usage (7d): {:.2}, Min expected stock (7d): {:.2}.",
        candidate.product_name,
        candidate.product_id,
        candidate.reorder_threshold,
        f64::from(candidate.current_stock),
        candidate.forecasted_usage,
        candidate.min_expected_stock,
    )
}

/// Low-stock detection and alert bookkeeping
#[derive(Debug, Clone)]
pub struct AlertService {
    products: ProductRepository,
    forecasts: ForecastRepository,
    alerts: AlertRepository,
}

impl AlertService {
    pub fn new(
        products: ProductRepository,
        forecasts: ForecastRepository,
        alerts: AlertRepository,
    ) -> Self {
        Self {
            products,
            forecasts,
            alerts,
        }
    }

    pub async fn evaluate(&self) -> Result<Vec<AlertCandidate>, ServiceError> {
        self.evaluate_as_of(Utc::now().date_naive()).await
    }

    /// Every product is evaluated; products without forecast rows in the
    /// window count as zero usage. Read only.
    #[instrument(skip(self))]
    pub async fn evaluate_as_of(&self, today: NaiveDate) -> Result<Vec<AlertCandidate>, ServiceError> {
        let window_end = today
            .checked_add_days(Days::new(ALERT_WINDOW_DAYS))
            .ok_or_else(|| ServiceError::BadRequest(format!("date out of range: {}", today)))?;

        let products = self.products.list_all().await?;
        let usage = self.forecasts.usage_in_window(today, window_end).await?;

        let candidates: Vec<AlertCandidate> = products
            .iter()
            .filter_map(|p| evaluate_product(p, usage.get(&p.id).copied().unwrap_or(0.0)))
            .collect();

        debug!(
            products = products.len(),
            candidates = candidates.len(),
            "Evaluated stock projections"
        );
        Ok(candidates)
    }

    /// Creates one `new` low-stock alert per candidate unless one is already
    /// open. All inserts share one transaction.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn persist_candidates(
        &self,
        candidates: &[AlertCandidate],
    ) -> Result<PersistSummary, ServiceError> {
        if candidates.is_empty() {
            return Ok(PersistSummary::default());
        }

        let txn = self.alerts.db().begin().await?;
        let mut summary = PersistSummary::default();

        for candidate in candidates {
            if self.insert_if_absent(&txn, candidate).await? {
                summary.created += 1;
            } else {
                summary.already_open += 1;
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit stock alerts");
            e
        })?;

        counter!("stockcast_alerts.created", summary.created as u64);
        Ok(summary)
    }

    /// Returns whether an alert was inserted. A concurrent checker that wins
    /// the race trips the open-alert unique index; its savepoint is rolled
    /// back and the alert counts as already open.
    async fn insert_if_absent(
        &self,
        txn: &DatabaseTransaction,
        candidate: &AlertCandidate,
    ) -> Result<bool, ServiceError> {
        if self
            .alerts
            .find_open(txn, candidate.product_id, AlertType::LowStock)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let savepoint = txn.begin().await?;
        let inserted = self
            .alerts
            .insert(
                &savepoint,
                candidate.product_id,
                AlertType::LowStock,
                format_alert_message(candidate),
            )
            .await;

        match inserted {
            Ok(alert) => {
                savepoint.commit().await?;
                debug!(alert_id = alert.id, product_id = alert.product_id, "Low stock alert created");
                Ok(true)
            }
            Err(e) if e.is_unique_violation() => {
                savepoint.rollback().await?;
                debug!(
                    product_id = candidate.product_id,
                    "Open alert created concurrently; skipping"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn check_alerts(&self) -> Result<AlertCheckReport, ServiceError> {
        self.check_alerts_as_of(Utc::now().date_naive()).await
    }

    /// Evaluates all products and records alerts for the candidates. A
    /// failed write is reported in the result instead of discarding the
    /// evaluation.
    pub async fn check_alerts_as_of(&self, today: NaiveDate) -> Result<AlertCheckReport, ServiceError> {
        let candidates = self.evaluate_as_of(today).await?;

        let report = match self.persist_candidates(&candidates).await {
            Ok(summary) => {
                if summary.created > 0 {
                    info!(created = summary.created, "Created new low stock alerts");
                }
                AlertCheckReport {
                    candidates,
                    created: summary.created,
                    persisted: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Stock alerts were not persisted");
                AlertCheckReport {
                    candidates,
                    created: 0,
                    persisted: false,
                    error: Some(e.to_string()),
                }
            }
        };

        Ok(report)
    }

    /// Operator status change, e.g. acknowledging or resolving an alert
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        alert_id: i32,
        status: AlertStatus,
    ) -> Result<AlertModel, ServiceError> {
        let alert = self
            .alerts
            .update_status(alert_id, status)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Alert {} not found", alert_id)))?;

        info!(alert_id, status = %alert.status, "Alert status updated");
        Ok(alert)
    }

    pub async fn list(
        &self,
        filter: &AlertFilter,
        page: Page,
    ) -> Result<Vec<AlertModel>, ServiceError> {
        self.alerts.list(filter, page).await
    }
}
