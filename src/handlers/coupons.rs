use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::coupon::{self, CouponType};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::coupons::normalize_code;
use crate::ApiResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponResponse {
    pub id: Uuid,
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub max_uses: i32,
    pub current_uses: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<coupon::Model> for CouponResponse {
    fn from(model: coupon::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            coupon_type: model.coupon_type,
            value: model.value,
            max_uses: model.max_uses,
            current_uses: model.current_uses,
            is_active: model.is_active,
            expires_at: model.expires_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCouponRequest {
    #[validate(length(min = 2, max = 32))]
    pub code: String,
    /// "percentage" or "fixed"
    pub coupon_type: CouponType,
    pub value: Decimal,
    /// 0 = unlimited
    #[serde(default)]
    #[validate(range(min = 0))]
    pub max_uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Pre-check of a coupon code before checkout
#[derive(Debug, Serialize, ToSchema)]
pub struct CouponValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponResponse>,
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = crate::ApiResponse<CouponResponse>),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CouponResponse>>), ServiceError> {
    request.validate()?;

    if request.value <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "value must be positive".to_string(),
        ));
    }
    if request.coupon_type == CouponType::Percentage && request.value > Decimal::from(100) {
        return Err(ServiceError::ValidationError(
            "percentage value cannot exceed 100".to_string(),
        ));
    }

    let code = normalize_code(&request.code);
    let existing = coupon::Entity::find()
        .filter(coupon::Column::Code.eq(code.clone()))
        .one(&*state.db)
        .await?;
    if existing.is_some() {
        return Err(ServiceError::Conflict(format!(
            "coupon code {} already exists",
            code
        )));
    }

    let model = coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        coupon_type: Set(request.coupon_type),
        value: Set(request.value),
        max_uses: Set(request.max_uses),
        current_uses: Set(0),
        is_active: Set(true),
        expires_at: Set(request.expires_at),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    };
    let inserted = model.insert(&*state.db).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(inserted.into())),
    ))
}

/// Check whether a coupon code is currently usable
#[utoipa::path(
    get,
    path = "/api/v1/coupons/validate/{code}",
    params(("code" = String, Path, description = "Coupon code, case-insensitive")),
    responses(
        (status = 200, description = "Validation outcome", body = crate::ApiResponse<CouponValidationResponse>)
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<CouponValidationResponse>>, ServiceError> {
    let found = state.services.coupons.find_usable(&code).await?;
    let response = match found {
        Some(coupon) => CouponValidationResponse {
            valid: true,
            coupon: Some(coupon.into()),
        },
        None => CouponValidationResponse {
            valid: false,
            coupon: None,
        },
    };
    Ok(Json(ApiResponse::success(response)))
}

/// Coupon routes
pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_coupon))
        .route("/validate/:code", get(validate_coupon))
}
