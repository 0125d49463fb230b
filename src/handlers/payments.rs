use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::transactions::ReconciliationReport;
use crate::ApiResponse;

/// Reconcile a payment against the gateway's authoritative status.
///
/// Idempotent: invoking it twice corrects the transaction at most
/// once; the second call reports `corrected: false`.
#[utoipa::path(
    get,
    path = "/api/v1/payments/reconcile/{merchant_ref}",
    params(("merchant_ref" = String, Path, description = "Merchant reference of the payment attempt")),
    responses(
        (status = 200, description = "Reconciliation report", body = crate::ApiResponse<ReconciliationReport>),
        (status = 404, description = "Unknown merchant reference", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Path(merchant_ref): Path<String>,
) -> Result<Json<ApiResponse<ReconciliationReport>>, ServiceError> {
    let report = state.services.transactions.reconcile(&merchant_ref).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/reconcile/:merchant_ref", get(reconcile_payment))
}
