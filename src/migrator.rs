use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_products_table::Migration),
            Box::new(m20240101_000002_create_sales_history_table::Migration),
            Box::new(m20240101_000003_create_forecasts_table::Migration),
            Box::new(m20240101_000004_create_stock_alerts_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Category).string().null())
                        .col(ColumnDef::new(Products::Sku).string().null().unique_key())
                        .col(
                            ColumnDef::new(Products::StockLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::ReorderThreshold)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(crate) enum Products {
        Table,
        Id,
        Name,
        Category,
        Sku,
        StockLevel,
        ReorderThreshold,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_sales_history_table {

    use super::m20240101_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_sales_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SalesHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SalesHistory::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SalesHistory::ProductId).integer().not_null())
                        .col(ColumnDef::new(SalesHistory::Date).date().not_null())
                        .col(
                            ColumnDef::new(SalesHistory::Quantity)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sales_history_product")
                                .from(SalesHistory::Table, SalesHistory::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per product per day; the ingestion upsert targets this key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_sales_history_product_date")
                        .table(SalesHistory::Table)
                        .col(SalesHistory::ProductId)
                        .col(SalesHistory::Date)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SalesHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SalesHistory {
        Table,
        Id,
        ProductId,
        Date,
        Quantity,
    }
}

mod m20240101_000003_create_forecasts_table {

    use super::m20240101_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_forecasts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Forecasts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Forecasts::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Forecasts::ProductId).integer().not_null())
                        .col(ColumnDef::new(Forecasts::Date).date().not_null())
                        .col(ColumnDef::new(Forecasts::PredictedQty).double().not_null())
                        .col(ColumnDef::new(Forecasts::LowerBound).double().null())
                        .col(ColumnDef::new(Forecasts::UpperBound).double().null())
                        .col(
                            ColumnDef::new(Forecasts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_forecasts_product")
                                .from(Forecasts::Table, Forecasts::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_forecasts_product_date")
                        .table(Forecasts::Table)
                        .col(Forecasts::ProductId)
                        .col(Forecasts::Date)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Forecasts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Forecasts {
        Table,
        Id,
        ProductId,
        Date,
        PredictedQty,
        LowerBound,
        UpperBound,
        CreatedAt,
    }
}

mod m20240101_000004_create_stock_alerts_table {

    use super::m20240101_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_stock_alerts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockAlerts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockAlerts::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockAlerts::ProductId).integer().not_null())
                        .col(
                            ColumnDef::new(StockAlerts::AlertType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockAlerts::Message).text().not_null())
                        .col(
                            ColumnDef::new(StockAlerts::Status)
                                .string_len(32)
                                .not_null()
                                .default("new"),
                        )
                        .col(
                            ColumnDef::new(StockAlerts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAlerts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_alerts_product")
                                .from(StockAlerts::Table, StockAlerts::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_alerts_status")
                        .table(StockAlerts::Table)
                        .col(StockAlerts::Status)
                        .to_owned(),
                )
                .await?;

            // At most one open alert per (product, type). Both Postgres and
            // SQLite accept partial indexes; the query builder has no WHERE clause for them.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS ux_stock_alerts_open \
                     ON stock_alerts (product_id, alert_type) WHERE status = 'new'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared("DROP INDEX IF EXISTS ux_stock_alerts_open")
                .await?;

            manager
                .drop_table(Table::drop().table(StockAlerts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockAlerts {
        Table,
        Id,
        ProductId,
        AlertType,
        Message,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
