use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;

use crate::entities::stock_alert::{
    ActiveModel as AlertActiveModel, AlertStatus, AlertType, Column, Entity as StockAlert,
    Model as AlertModel,
};
use crate::errors::ServiceError;
use crate::repositories::{Page, Repository};

use super::BaseRepository;

/// Filters for alert listings
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub product_id: Option<i32>,
    pub status: Option<AlertStatus>,
}

/// Repository for stock alerts.
///
/// The lookup and insert used by the alert check take any connection so
/// they can run inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct AlertRepository {
    base: BaseRepository,
}

impl AlertRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    /// The open (`new`) alert of the given type for a product, if any
    pub async fn find_open<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<AlertModel>, ServiceError> {
        Ok(StockAlert::find()
            .filter(Column::ProductId.eq(product_id))
            .filter(Column::AlertType.eq(alert_type))
            .filter(Column::Status.eq(AlertStatus::New))
            .one(conn)
            .await?)
    }

    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: i32,
        alert_type: AlertType,
        message: String,
    ) -> Result<AlertModel, ServiceError> {
        let now = Utc::now();
        let model = AlertActiveModel {
            product_id: Set(product_id),
            alert_type: Set(alert_type),
            message: Set(message),
            status: Set(AlertStatus::New),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(model.insert(conn).await?)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<AlertModel>, ServiceError> {
        Ok(StockAlert::find_by_id(id).one(self.db()).await?)
    }

    /// Set an alert's status. Returns `None` when the alert does not exist.
    ///
    /// Moving an alert back to `new` while another open alert exists for the
    /// same product and type is a [`ServiceError::Conflict`].
    pub async fn update_status(
        &self,
        id: i32,
        status: AlertStatus,
    ) -> Result<Option<AlertModel>, ServiceError> {
        let Some(alert) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        let (product_id, alert_type) = (alert.product_id, alert.alert_type);

        let mut model: AlertActiveModel = alert.into();
        model.status = Set(status);
        model.updated_at = Set(Utc::now());
        let updated = model.update(self.db()).await.map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict(format!(
                    "product {} already has an open {} alert",
                    product_id, alert_type
                ))
            } else {
                err
            }
        })?;
        Ok(Some(updated))
    }

    /// Alerts matching `filter`, newest first
    pub async fn list(
        &self,
        filter: &AlertFilter,
        page: Page,
    ) -> Result<Vec<AlertModel>, ServiceError> {
        let mut query = StockAlert::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(Column::ProductId.eq(product_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }

        Ok(query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .offset(page.skip)
            .limit(page.limit)
            .all(self.db())
            .await?)
    }
}
