use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::ml::{DemandModel, Frequency, ModelConfig, SeasonalTrendModel};
use crate::repositories::{ForecastRepository, ProductRepository, SalesRepository};

/// Result of one product's generation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    /// Forecast rows were written; `points` is the number of future rows
    Generated { points: u64 },
    /// Not enough usable history to fit a model
    Skipped { reason: String },
    Failed { error: String },
}

impl ForecastOutcome {
    fn label(&self) -> &'static str {
        match self {
            ForecastOutcome::Generated { .. } => "generated",
            ForecastOutcome::Skipped { .. } => "skipped",
            ForecastOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-product outcomes of a generation run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub as_of: NaiveDate,
    pub horizon: u32,
    pub frequency: Frequency,
    pub results: BTreeMap<i32, ForecastOutcome>,
}

impl GenerationReport {
    fn count(&self, pred: impl Fn(&ForecastOutcome) -> bool) -> usize {
        self.results.values().filter(|o| pred(o)).count()
    }

    pub fn generated(&self) -> usize {
        self.count(|o| matches!(o, ForecastOutcome::Generated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ForecastOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ForecastOutcome::Failed { .. }))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed",
            self.generated(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Concurrency and timeout settings of a generation run
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_workers: usize,
    pub fit_timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            fit_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for GenerationSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_workers: cfg.forecast_max_workers,
            fit_timeout: cfg.forecast_fit_timeout(),
        }
    }
}

/// Fits a demand model per product and replaces its future forecast rows.
///
/// Products are independent: a failing product never aborts the run.
#[derive(Clone)]
pub struct ForecastingService {
    products: ProductRepository,
    sales: SalesRepository,
    forecasts: ForecastRepository,
    model: Arc<dyn DemandModel>,
    settings: GenerationSettings,
}

impl ForecastingService {
    pub fn new(
        products: ProductRepository,
        sales: SalesRepository,
        forecasts: ForecastRepository,
        model: Arc<dyn DemandModel>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            products,
            sales,
            forecasts,
            model,
            settings,
        }
    }

    /// Service wired with the default seasonal model and settings from `cfg`
    pub fn from_config(
        products: ProductRepository,
        sales: SalesRepository,
        forecasts: ForecastRepository,
        cfg: &AppConfig,
    ) -> Self {
        let model = SeasonalTrendModel::new(ModelConfig {
            min_points: cfg.forecast_min_points,
            ..ModelConfig::default()
        });
        Self::new(products, sales, forecasts, Arc::new(model), cfg.into())
    }

    pub fn forecasts(&self) -> &ForecastRepository {
        &self.forecasts
    }

    pub async fn generate_and_persist(
        &self,
        product_ids: Option<Vec<i32>>,
        horizon: u32,
        frequency: Frequency,
    ) -> Result<GenerationReport, ServiceError> {
        let today = Utc::now().date_naive();
        self.generate_and_persist_as_of(product_ids, horizon, frequency, today)
            .await
    }

    /// Runs generation treating `today` as the first date that counts as
    /// future. An empty or absent id list means every known product.
    #[instrument(skip(self, product_ids, frequency), fields(frequency = %frequency))]
    pub async fn generate_and_persist_as_of(
        &self,
        product_ids: Option<Vec<i32>>,
        horizon: u32,
        frequency: Frequency,
        today: NaiveDate,
    ) -> Result<GenerationReport, ServiceError> {
        let mut results = BTreeMap::new();

        let targets = match product_ids.filter(|ids| !ids.is_empty()) {
            None => self.products.list_ids().await?,
            Some(mut ids) => {
                ids.sort_unstable();
                ids.dedup();
                let known: HashSet<i32> = self
                    .products
                    .find_by_ids(&ids)
                    .await?
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                let (found, missing): (Vec<i32>, Vec<i32>) =
                    ids.into_iter().partition(|id| known.contains(id));
                for id in missing {
                    warn!(product_id = id, "Forecast requested for unknown product");
                    results.insert(
                        id,
                        ForecastOutcome::Failed {
                            error: format!("product {} not found", id),
                        },
                    );
                }
                found
            }
        };

        info!(
            products = targets.len(),
            horizon,
            %today,
            "Starting forecast generation"
        );

        let workers = self.settings.max_workers.max(1);
        let outcomes: Vec<(i32, ForecastOutcome)> = stream::iter(targets)
            .map(|product_id| async move {
                let outcome = self
                    .generate_for_product(product_id, horizon, frequency, today)
                    .await;
                (product_id, outcome)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        for (product_id, outcome) in outcomes {
            counter!("stockcast_forecast.outcomes", 1, "outcome" => outcome.label());
            results.insert(product_id, outcome);
        }

        let report = GenerationReport {
            as_of: today,
            horizon,
            frequency,
            results,
        };
        info!(summary = %report.summary(), "Forecast generation finished");
        Ok(report)
    }

    async fn generate_for_product(
        &self,
        product_id: i32,
        horizon: u32,
        frequency: Frequency,
        today: NaiveDate,
    ) -> ForecastOutcome {
        let series = match self.sales.series(product_id).await {
            Ok(series) => series,
            Err(e) => {
                warn!(product_id, error = %e, "Failed to read sales history");
                return ForecastOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let model = Arc::clone(&self.model);
        let fit = tokio::task::spawn_blocking(move || model.fit_predict(&series, horizon, frequency));

        // A timed-out fit keeps its blocking thread until it returns; the result is discarded.
        let points = match tokio::time::timeout(self.settings.fit_timeout, fit).await {
            Err(_) => {
                warn!(
                    product_id,
                    timeout_secs = self.settings.fit_timeout.as_secs_f64(),
                    "Model fit timed out"
                );
                return ForecastOutcome::Failed {
                    error: format!(
                        "model fit timed out after {}s",
                        self.settings.fit_timeout.as_secs_f64()
                    ),
                };
            }
            Ok(Err(join_err)) => {
                warn!(product_id, error = %join_err, "Model fit task aborted");
                return ForecastOutcome::Failed {
                    error: format!("model fit aborted: {}", join_err),
                };
            }
            Ok(Ok(Err(e))) if e.is_data_problem() => {
                debug!(product_id, reason = %e, "Skipping product");
                return ForecastOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
            Ok(Ok(Err(e))) => {
                warn!(product_id, error = %e, "Model fit failed");
                return ForecastOutcome::Failed {
                    error: e.to_string(),
                };
            }
            Ok(Ok(Ok(points))) => points,
        };

        match self
            .forecasts
            .replace_future(product_id, today, &points)
            .await
        {
            Ok(inserted) => {
                debug!(product_id, inserted, "Forecast persisted");
                ForecastOutcome::Generated { points: inserted }
            }
            Err(e) => {
                warn!(product_id, error = %e, "Failed to persist forecast");
                ForecastOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
