use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::stock_tier;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::ApiResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct StockTierResponse {
    pub id: Uuid,
    pub amount: i64,
    pub price: Decimal,
    pub is_active: bool,
    pub allow_orders: bool,
}

impl From<stock_tier::Model> for StockTierResponse {
    fn from(model: stock_tier::Model) -> Self {
        Self {
            id: model.id,
            amount: model.amount,
            price: model.price,
            is_active: model.is_active,
            allow_orders: model.allow_orders,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateStockTierRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub allow_orders: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStockTierRequest {
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
    /// Set false to freeze sales temporarily without deactivating
    pub allow_orders: Option<bool>,
}

/// List tiers currently open for ordering
#[utoipa::path(
    get,
    path = "/api/v1/stock-tiers",
    responses(
        (status = 200, description = "Orderable stock tiers", body = crate::ApiResponse<Vec<StockTierResponse>>)
    ),
    tag = "StockTiers"
)]
pub async fn list_stock_tiers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<StockTierResponse>>>, ServiceError> {
    let tiers = stock_tier::Entity::find()
        .filter(stock_tier::Column::IsActive.eq(true))
        .filter(stock_tier::Column::AllowOrders.eq(true))
        .order_by_asc(stock_tier::Column::Amount)
        .all(&*state.db)
        .await?;

    Ok(Json(ApiResponse::success(
        tiers.into_iter().map(Into::into).collect(),
    )))
}

/// Create a stock tier
#[utoipa::path(
    post,
    path = "/api/v1/stock-tiers",
    request_body = CreateStockTierRequest,
    responses(
        (status = 201, description = "Tier created", body = crate::ApiResponse<StockTierResponse>),
        (status = 409, description = "A tier for this amount exists", body = crate::errors::ErrorResponse)
    ),
    tag = "StockTiers"
)]
pub async fn create_stock_tier(
    State(state): State<AppState>,
    Json(request): Json<CreateStockTierRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StockTierResponse>>), ServiceError> {
    request.validate()?;

    if request.price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "price must be positive".to_string(),
        ));
    }

    // One canonical tier per amount
    let existing = stock_tier::Entity::find()
        .filter(stock_tier::Column::Amount.eq(request.amount))
        .one(&*state.db)
        .await?;
    if existing.is_some() {
        return Err(ServiceError::Conflict(format!(
            "a stock tier for amount {} already exists",
            request.amount
        )));
    }

    let model = stock_tier::ActiveModel {
        id: Set(Uuid::new_v4()),
        amount: Set(request.amount),
        price: Set(request.price),
        is_active: Set(request.is_active),
        allow_orders: Set(request.allow_orders),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    let inserted = model.insert(&*state.db).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(inserted.into())),
    ))
}

/// Update a stock tier's price or availability flags
#[utoipa::path(
    put,
    path = "/api/v1/stock-tiers/{id}",
    params(("id" = Uuid, Path, description = "Stock tier ID")),
    request_body = UpdateStockTierRequest,
    responses(
        (status = 200, description = "Tier updated", body = crate::ApiResponse<StockTierResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "StockTiers"
)]
pub async fn update_stock_tier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStockTierRequest>,
) -> Result<Json<ApiResponse<StockTierResponse>>, ServiceError> {
    let tier = stock_tier::Entity::find_by_id(id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Stock tier {} not found", id)))?;

    if let Some(price) = request.price {
        if price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price must be positive".to_string(),
            ));
        }
    }

    let mut active: stock_tier::ActiveModel = tier.into();
    if let Some(price) = request.price {
        active.price = Set(price);
    }
    if let Some(is_active) = request.is_active {
        active.is_active = Set(is_active);
    }
    if let Some(allow_orders) = request.allow_orders {
        active.allow_orders = Set(allow_orders);
    }
    active.updated_at = Set(Some(Utc::now()));

    let updated = active.update(&*state.db).await?;
    Ok(Json(ApiResponse::success(updated.into())))
}

/// Stock tier routes
pub fn stock_tier_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stock_tiers))
        .route("/", post(create_stock_tier))
        .route("/:id", put(update_stock_tier))
}
