use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::handlers::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    merchant_ref: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    status: String,
}

/// Inbound payment-status webhook from the gateway.
///
/// Replays are harmless: the status change funnels into the same
/// guarded transition manual reconciliation uses, so a duplicate
/// delivery (or a webhook racing a reconcile) changes nothing.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Verify signature if configured
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs.unwrap_or(300);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::ValidationError(
                "invalid webhook signature".to_string(),
            ));
        }
    } else {
        warn!("payment webhook received without a configured secret; accepting unverified");
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook body: {}", e)))?;

    let Some(merchant_ref) = payload.merchant_ref.as_deref() else {
        warn!("webhook payload carried no merchant_ref");
        return Ok((axum::http::StatusCode::OK, axum::Json(json!({ "success": true }))));
    };

    let Some(tx) = state
        .services
        .transactions
        .find_by_merchant_ref(merchant_ref)
        .await?
    else {
        warn!(%merchant_ref, "webhook for unknown merchant reference");
        return Ok((axum::http::StatusCode::OK, axum::Json(json!({ "success": true }))));
    };

    match payload.status.to_ascii_uppercase().as_str() {
        "PAID" => {
            let corrected = state.services.transactions.mark_paid(tx.id).await?;
            info!(
                transaction_id = %tx.id,
                %merchant_ref,
                corrected,
                "webhook reported PAID"
            );
        }
        "EXPIRED" | "FAILED" => {
            // Only a pending transaction fails on gateway expiry; a
            // processing one already confirmed its payment
            let corrected = state
                .services
                .transactions
                .fail_unpaid(tx.id, format!("gateway reported {}", payload.status))
                .await?;
            info!(
                transaction_id = %tx.id,
                status = %payload.status,
                corrected,
                "webhook reported failure"
            );
        }
        other => {
            info!(
                transaction_id = %tx.id,
                status = %other,
                reference = ?payload.reference,
                "unhandled webhook status"
            );
        }
    }

    Ok((axum::http::StatusCode::OK, axum::Json(json!({ "success": true }))))
}

fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Webhook routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}
