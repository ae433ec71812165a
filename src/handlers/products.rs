use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::common::{created_response, success_response, validate_input, PaginationParams};
use crate::errors::ServiceError;
use crate::repositories::product_repository::NewProduct;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 255))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub stock_level: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub reorder_threshold: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStockRequest {
    #[validate(range(min = 0))]
    pub stock_level: Option<i32>,
    #[validate(range(min = 0))]
    pub reorder_threshold: Option<i32>,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    let products = state.services.products.list(pagination.page()).await?;
    Ok(success_response(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Response, ServiceError> {
    let product = state
        .services
        .products
        .find_by_id(product_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
    Ok(success_response(product))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;

    let product = state
        .services
        .products
        .create(NewProduct {
            name: request.name,
            category: request.category,
            sku: request.sku,
            stock_level: request.stock_level,
            reorder_threshold: request.reorder_threshold,
        })
        .await?;
    Ok(created_response(product))
}

/// Operator update of on-hand stock and/or reorder threshold
pub async fn update_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    Json(request): Json<UpdateStockRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    if request.stock_level.is_none() && request.reorder_threshold.is_none() {
        return Err(ServiceError::BadRequest(
            "stock_level or reorder_threshold is required".to_string(),
        ));
    }

    let product = state
        .services
        .products
        .update_stock(product_id, request.stock_level, request.reorder_threshold)
        .await?;
    Ok(success_response(product))
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:product_id", get(get_product))
        .route("/:product_id/stock", put(update_stock))
}
