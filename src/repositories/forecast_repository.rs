use chrono::{NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::entities::forecast::{
    ActiveModel as ForecastActiveModel, Column, Entity as Forecast, Model as ForecastModel,
};
use crate::errors::ServiceError;
use crate::ml::PredictedPoint;
use crate::repositories::{Page, Repository};

use super::BaseRepository;

/// Filters for forecast listings
#[derive(Debug, Clone, Default)]
pub struct ForecastFilter {
    pub product_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Repository for persisted forecasts
#[derive(Debug, Clone)]
pub struct ForecastRepository {
    base: BaseRepository,
}

impl ForecastRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Replaces every forecast row of `product_id` dated on or after `cutoff`
    /// with `points`. Points dated before `cutoff` are dropped. Runs in one
    /// transaction, so readers see either the old or the new set.
    pub async fn replace_future(
        &self,
        product_id: i32,
        cutoff: NaiveDate,
        points: &[PredictedPoint],
    ) -> Result<u64, ServiceError> {
        let txn = self.base.get_db().begin().await?;

        let deleted = Forecast::delete_many()
            .filter(Column::ProductId.eq(product_id))
            .filter(Column::Date.gte(cutoff))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(product_id, error = %e, "Failed to clear future forecasts");
                e
            })?;

        let created_at = Utc::now();
        let rows: Vec<ForecastActiveModel> = points
            .iter()
            .filter(|p| p.date >= cutoff)
            .map(|p| ForecastActiveModel {
                product_id: Set(product_id),
                date: Set(p.date),
                predicted_qty: Set(p.predicted_qty),
                lower_bound: Set(Some(p.lower_bound)),
                upper_bound: Set(Some(p.upper_bound)),
                created_at: Set(created_at),
                ..Default::default()
            })
            .collect();
        let inserted = rows.len() as u64;

        if !rows.is_empty() {
            Forecast::insert_many(rows)
                .exec_without_returning(&txn)
                .await
                .map_err(|e| {
                    error!(product_id, error = %e, "Failed to insert forecasts");
                    e
                })?;
        }

        txn.commit().await?;

        debug!(
            product_id,
            deleted = deleted.rows_affected,
            inserted,
            "Replaced future forecasts"
        );
        Ok(inserted)
    }

    pub async fn query(
        &self,
        filter: &ForecastFilter,
        page: Page,
    ) -> Result<Vec<ForecastModel>, ServiceError> {
        let mut query = Forecast::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(Column::ProductId.eq(product_id));
        }
        if let Some(start) = filter.start_date {
            query = query.filter(Column::Date.gte(start));
        }
        if let Some(end) = filter.end_date {
            query = query.filter(Column::Date.lte(end));
        }

        Ok(query
            .order_by_asc(Column::ProductId)
            .order_by_asc(Column::Date)
            .offset(page.skip)
            .limit(page.limit)
            .all(self.base.get_db())
            .await?)
    }

    /// Forecast rows of one product, ordered by date
    pub async fn for_product(
        &self,
        product_id: i32,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<ForecastModel>, ServiceError> {
        let mut query = Forecast::find().filter(Column::ProductId.eq(product_id));
        if let Some(start) = start {
            query = query.filter(Column::Date.gte(start));
        }
        if let Some(end) = end {
            query = query.filter(Column::Date.lte(end));
        }
        Ok(query
            .order_by_asc(Column::Date)
            .all(self.base.get_db())
            .await?)
    }

    /// Per-product sum of predicted quantities over `[start, end]`.
    /// Products without rows in the window are absent from the map.
    pub async fn usage_in_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<i32, f64>, ServiceError> {
        let rows: Vec<(i32, f64)> = Forecast::find()
            .select_only()
            .column(Column::ProductId)
            .column(Column::PredictedQty)
            .filter(Column::Date.between(start, end))
            .into_tuple()
            .all(self.base.get_db())
            .await?;

        let mut usage = HashMap::new();
        for (product_id, qty) in rows {
            *usage.entry(product_id).or_insert(0.0) += qty;
        }
        Ok(usage)
    }
}
