use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::entities::product::Model as ProductModel;
use crate::errors::ServiceError;
use crate::ledger::{LedgerClient, LedgerEntry};
use crate::repositories::{ProductRepository, SalesRepository};

/// Source of posted sales movements keyed by item number
#[async_trait]
pub trait SalesSource: Send + Sync {
    async fn entries(
        &self,
        item_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, ServiceError>;
}

#[async_trait]
impl SalesSource for LedgerClient {
    async fn entries(
        &self,
        item_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, ServiceError> {
        self.item_ledger_entries(item_number, start, end).await
    }
}

/// Sums quantities per day. Dates come back ascending.
pub fn merge_daily(entries: impl IntoIterator<Item = (NaiveDate, f64)>) -> Vec<(NaiveDate, f64)> {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (date, quantity) in entries {
        *days.entry(date).or_insert(0.0) += quantity;
    }
    days.into_iter().collect()
}

/// Daily demand from ledger entries: sale movements only, as positive quantities
pub fn daily_demand(entries: &[LedgerEntry]) -> Vec<(NaiveDate, f64)> {
    merge_daily(
        entries
            .iter()
            .filter(|e| e.is_sale())
            .map(|e| (e.posting_date, e.quantity.abs())),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported { entries: usize, days: u64 },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub results: BTreeMap<i32, ImportOutcome>,
}

/// Copies sales history from the external ledger into `sales_history`
#[derive(Clone)]
pub struct SalesImportService {
    products: ProductRepository,
    sales: SalesRepository,
    source: Arc<dyn SalesSource>,
}

impl SalesImportService {
    pub fn new(
        products: ProductRepository,
        sales: SalesRepository,
        source: Arc<dyn SalesSource>,
    ) -> Self {
        Self {
            products,
            sales,
            source,
        }
    }

    /// Imports `[start, end]` for the given products, or for every product
    /// when none are named. Any upstream failure aborts the import.
    #[instrument(skip(self, product_ids))]
    pub async fn import(
        &self,
        product_ids: Option<Vec<i32>>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ImportReport, ServiceError> {
        if start > end {
            return Err(ServiceError::BadRequest(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }

        let products: Vec<ProductModel> = match product_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                let found = self.products.find_by_ids(&ids).await?;
                if let Some(missing) = ids.iter().find(|id| !found.iter().any(|p| p.id == **id)) {
                    return Err(ServiceError::NotFound(format!(
                        "Product {} not found",
                        missing
                    )));
                }
                found
            }
            None => self.products.list_all().await?,
        };

        let mut results = BTreeMap::new();
        for product in products {
            let Some(sku) = product.sku.as_deref().filter(|s| !s.trim().is_empty()) else {
                results.insert(
                    product.id,
                    ImportOutcome::Skipped {
                        reason: "product has no sku".to_string(),
                    },
                );
                continue;
            };

            let entries = self.source.entries(sku, start, end).await.map_err(|e| {
                warn!(product_id = product.id, sku, error = %e, "Sales source request failed");
                e
            })?;
            let days = daily_demand(&entries);
            let written = self.sales.upsert_daily(product.id, &days).await?;

            results.insert(
                product.id,
                ImportOutcome::Imported {
                    entries: entries.len(),
                    days: written,
                },
            );
        }

        info!(products = results.len(), "Sales import finished");
        Ok(ImportReport {
            start_date: start,
            end_date: end,
            results,
        })
    }
}
