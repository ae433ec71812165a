use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;

use crate::entities::product::{
    ActiveModel as ProductActiveModel, Column, Entity as Product, Model as ProductModel,
};
use crate::errors::ServiceError;
use crate::repositories::{Page, Repository};

use super::BaseRepository;

/// Fields accepted when registering a product
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub category: Option<String>,
    pub sku: Option<String>,
    pub stock_level: i32,
    pub reorder_threshold: i32,
}

/// Repository for the product directory
#[derive(Debug, Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find a product by ID
    pub async fn find_by_id(&self, id: i32) -> Result<Option<ProductModel>, ServiceError> {
        Ok(Product::find_by_id(id).one(self.base.get_db()).await?)
    }

    /// Every known product, ordered by id
    pub async fn list_all(&self) -> Result<Vec<ProductModel>, ServiceError> {
        Ok(Product::find()
            .order_by_asc(Column::Id)
            .all(self.base.get_db())
            .await?)
    }

    pub async fn list(&self, page: Page) -> Result<Vec<ProductModel>, ServiceError> {
        Ok(Product::find()
            .order_by_asc(Column::Id)
            .offset(page.skip)
            .limit(page.limit)
            .all(self.base.get_db())
            .await?)
    }

    pub async fn list_ids(&self) -> Result<Vec<i32>, ServiceError> {
        Ok(Product::find()
            .select_only()
            .column(Column::Id)
            .order_by_asc(Column::Id)
            .into_tuple::<i32>()
            .all(self.base.get_db())
            .await?)
    }

    pub async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<ProductModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Product::find()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(self.base.get_db())
            .await?)
    }

    /// Register a new product
    pub async fn create(&self, product: NewProduct) -> Result<ProductModel, ServiceError> {
        let now = Utc::now();
        let model = ProductActiveModel {
            name: Set(product.name),
            category: Set(product.category),
            sku: Set(product.sku),
            stock_level: Set(product.stock_level),
            reorder_threshold: Set(product.reorder_threshold),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        model.insert(self.base.get_db()).await.map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                ServiceError::Conflict("a product with this SKU already exists".to_string())
            } else {
                err
            }
        })
    }

    /// Update on-hand stock and/or reorder threshold
    pub async fn update_stock(
        &self,
        id: i32,
        stock_level: Option<i32>,
        reorder_threshold: Option<i32>,
    ) -> Result<ProductModel, ServiceError> {
        let product = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        let mut model: ProductActiveModel = product.into();
        if let Some(level) = stock_level {
            model.stock_level = Set(level);
        }
        if let Some(threshold) = reorder_threshold {
            model.reorder_threshold = Set(threshold);
        }
        model.updated_at = Set(Utc::now());

        Ok(model.update(self.base.get_db()).await?)
    }
}
