//! OpenAPI documentation assembled from the handler annotations.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Robux Shop API",
        description = "Transaction lifecycle and payment orchestration for Robux top-up orders",
        version = env!("CARGO_PKG_VERSION"),
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::transactions::create_transaction,
        crate::handlers::transactions::get_transaction,
        crate::handlers::transactions::list_transactions,
        crate::handlers::transactions::create_payment,
        crate::handlers::transactions::override_status,
        crate::handlers::gamepass::verify_gamepass,
        crate::handlers::payments::reconcile_payment,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::stock_tiers::list_stock_tiers,
        crate::handlers::stock_tiers::create_stock_tier,
        crate::handlers::stock_tiers::update_stock_tier,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::validate_coupon,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::transactions::CreateTransactionInput,
        crate::services::transactions::CreatePaymentInput,
        crate::services::transactions::LoginCredentials,
        crate::services::transactions::TransactionResponse,
        crate::services::transactions::PaymentSessionResponse,
        crate::services::transactions::ReconciliationReport,
        crate::services::gamepass::GamepassCandidate,
        crate::handlers::gamepass::VerifyGamepassRequest,
        crate::handlers::gamepass::VerifyGamepassResponse,
        crate::handlers::transactions::AdminStatusRequest,
        crate::handlers::stock_tiers::StockTierResponse,
        crate::handlers::stock_tiers::CreateStockTierRequest,
        crate::handlers::stock_tiers::UpdateStockTierRequest,
        crate::handlers::coupons::CouponResponse,
        crate::handlers::coupons::CreateCouponRequest,
        crate::handlers::coupons::CouponValidationResponse,
    )),
    tags(
        (name = "Transactions", description = "Purchase lifecycle"),
        (name = "Gamepass", description = "Marketplace verification"),
        (name = "Payments", description = "Gateway integration and reconciliation"),
        (name = "StockTiers", description = "Pricing points"),
        (name = "Coupons", description = "Discount codes"),
        (name = "Health", description = "Probes"),
    )
)]
pub struct ApiDoc;
