use chrono::NaiveDate;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::sync::Arc;

use crate::entities::sales_history::{
    ActiveModel as SalesActiveModel, Column, Entity as SalesHistory, Model as SalesModel,
};
use crate::errors::ServiceError;
use crate::ml::SeriesPoint;
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for daily sales history
#[derive(Debug, Clone)]
pub struct SalesRepository {
    base: BaseRepository,
}

impl SalesRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// All sales rows of a product, oldest first
    pub async fn list_sales(&self, product_id: i32) -> Result<Vec<SalesModel>, ServiceError> {
        Ok(SalesHistory::find()
            .filter(Column::ProductId.eq(product_id))
            .order_by_asc(Column::Date)
            .all(self.base.get_db())
            .await?)
    }

    pub async fn list_range(
        &self,
        product_id: i32,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<SalesModel>, ServiceError> {
        let mut query = SalesHistory::find().filter(Column::ProductId.eq(product_id));
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

    /// Sales history shaped as a model input series
    pub async fn series(&self, product_id: i32) -> Result<Vec<SeriesPoint>, ServiceError> {
        Ok(self
            .list_sales(product_id)
            .await?
            .into_iter()
            .map(|row| SeriesPoint {
                date: row.date,
                quantity: row.quantity,
            })
            .collect())
    }

    /// Writes one row per `(product, date)`, overwriting the quantity of
    /// days already recorded. Returns the number of rows written.
    pub async fn upsert_daily(
        &self,
        product_id: i32,
        entries: &[(NaiveDate, f64)],
    ) -> Result<u64, ServiceError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let models = entries.iter().map(|(date, quantity)| SalesActiveModel {
            product_id: Set(product_id),
            date: Set(*date),
            quantity: Set(*quantity),
            ..Default::default()
        });

        SalesHistory::insert_many(models)
            .on_conflict(
                OnConflict::columns([Column::ProductId, Column::Date])
                    .update_column(Column::Quantity)
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;

        Ok(entries.len() as u64)
    }
}
