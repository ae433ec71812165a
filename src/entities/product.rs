use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Product entity. Stock and threshold are maintained by inventory operators.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,

    pub category: Option<String>,

    /// Item number in the external sales ledger
    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 100, message = "SKU must be between 1 and 100 characters"))]
    pub sku: Option<String>,

    #[validate(range(min = 0, message = "Stock level cannot be negative"))]
    pub stock_level: i32,

    #[validate(range(min = 0, message = "Reorder threshold cannot be negative"))]
    pub reorder_threshold: i32,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sales_history::Entity")]
    Sales,
    #[sea_orm(has_many = "super::forecast::Entity")]
    Forecasts,
    #[sea_orm(has_many = "super::stock_alert::Entity")]
    Alerts,
}

impl Related<super::sales_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sales.def()
    }
}

impl Related<super::forecast::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Forecasts.def()
    }
}

impl Related<super::stock_alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alerts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
