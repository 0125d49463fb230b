use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::PaginationParams;
use crate::entities::robux_transaction::TransactionStatus;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::transactions::{
    CreatePaymentInput, CreateTransactionInput, PaymentSessionResponse, TransactionResponse,
};
use crate::ApiResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransactionStatusFilter {
    /// Filter by status (pending, processing, completed, failed)
    pub status: Option<String>,
}

/// Admin override of a transaction's lifecycle.
#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({ "action": "complete" }))]
pub struct AdminStatusRequest {
    /// "complete" (fulfillment confirmed) or "fail"
    pub action: String,
    /// Recorded as the failure reason when failing
    pub reason: Option<String>,
}

/// Create a transaction
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = CreateTransactionInput,
    responses(
        (status = 201, description = "Transaction created", body = crate::ApiResponse<TransactionResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(input): Json<CreateTransactionInput>,
) -> Result<(StatusCode, Json<ApiResponse<TransactionResponse>>), ServiceError> {
    let response = state.services.transactions.create_transaction(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Get transaction by ID
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction details", body = crate::ApiResponse<TransactionResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ServiceError> {
    let response = state.services.transactions.get_transaction(id).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// List transactions with pagination and status filtering
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    params(PaginationParams),
    responses(
        (status = 200, description = "List transactions", body = crate::ApiResponse<crate::PaginatedResponse<TransactionResponse>>)
    ),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<TransactionStatusFilter>,
) -> Result<Json<ApiResponse<crate::PaginatedResponse<TransactionResponse>>>, ServiceError> {
    let status = filter.status.as_deref().map(parse_status_filter).transpose()?;

    let page = params.page.max(1);
    let limit = params.clamped_per_page();
    let (items, total) = state
        .services
        .transactions
        .list_transactions(page, limit, status)
        .await?;

    let response = crate::PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    };
    Ok(Json(ApiResponse::success(response)))
}

/// Attach a payment to a pending transaction
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/payment",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = CreatePaymentInput,
    responses(
        (status = 201, description = "Payment session created", body = crate::ApiResponse<PaymentSessionResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 402, description = "Rejected by gateway", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreatePaymentInput>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentSessionResponse>>), ServiceError> {
    let response = state.services.transactions.create_payment(id, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Admin status override (fulfillment confirmed or manual failure)
#[utoipa::path(
    post,
    path = "/api/v1/transactions/{id}/status",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = AdminStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<TransactionResponse>),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse)
    ),
    tag = "Transactions"
)]
pub async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdminStatusRequest>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ServiceError> {
    let response = match request.action.trim().to_ascii_lowercase().as_str() {
        "complete" => state.services.transactions.mark_completed(id).await?,
        "fail" => {
            state
                .services
                .transactions
                .mark_failed(id, request.reason)
                .await?
        }
        other => {
            return Err(ServiceError::ValidationError(format!(
                "unknown action '{}', expected 'complete' or 'fail'",
                other
            )))
        }
    };
    Ok(Json(ApiResponse::success(response)))
}

pub(crate) fn parse_status_filter(value: &str) -> Result<TransactionStatus, ServiceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(TransactionStatus::Pending),
        "processing" => Ok(TransactionStatus::Processing),
        "completed" => Ok(TransactionStatus::Completed),
        "failed" => Ok(TransactionStatus::Failed),
        other => Err(ServiceError::ValidationError(format!(
            "invalid status filter: {}",
            other
        ))),
    }
}

/// Transaction routes
pub fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_transaction))
        .route("/", get(list_transactions))
        .route("/:id", get(get_transaction))
        .route("/:id/payment", post(create_payment))
        .route("/:id/status", post(override_status))
}
