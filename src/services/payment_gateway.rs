//! Payment gateway client.
//!
//! Builds signed payment-creation requests and parses the responses
//! into durable references. Three failure families stay
//! distinguishable: missing server configuration, gateway rejection,
//! and transport/malformed-response errors, because each needs a
//! different operator response.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Payment status as the gateway reports it.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum GatewayPaymentStatus {
    #[strum(serialize = "PAID")]
    Paid,
    #[strum(serialize = "UNPAID")]
    Unpaid,
    #[strum(serialize = "EXPIRED")]
    Expired,
    #[strum(serialize = "FAILED")]
    Failed,
    #[strum(serialize = "REFUND")]
    Refund,
    #[strum(default)]
    Unknown(String),
}

/// A charge successfully created at the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentSession {
    pub merchant_ref: String,
    pub reference: String,
    pub checkout_url: String,
}

/// Input for creating a charge.
#[derive(Debug, Clone)]
pub struct CreateGatewayPayment {
    pub transaction_id: Uuid,
    /// Gateway payment channel, e.g. "QRIS" or "BRIVA"
    pub channel: String,
    pub amount: Decimal,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub item_name: String,
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateData {
    reference: String,
    checkout_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusData {
    status: String,
}

#[derive(Clone, Debug)]
pub struct PaymentGatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    merchant_code: String,
    private_key: String,
    callback_url: String,
    return_url: String,
    ref_prefix: String,
}

impl PaymentGatewayClient {
    /// Builds a client from configuration. Every missing secret/URL is
    /// a fatal configuration error, reported distinctly from gateway
    /// and transport failures.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        fn required(
            value: &Option<String>,
            key: &str,
        ) -> Result<String, ServiceError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ServiceError::ConfigurationError(format!(
                        "payment gateway setting {} is not configured",
                        key
                    ))
                })
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.payment_gateway_timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.payment_gateway_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: required(&cfg.payment_gateway_base_url, "payment_gateway_base_url")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required(&cfg.payment_gateway_api_key, "payment_gateway_api_key")?,
            merchant_code: required(
                &cfg.payment_gateway_merchant_code,
                "payment_gateway_merchant_code",
            )?,
            private_key: required(
                &cfg.payment_gateway_private_key,
                "payment_gateway_private_key",
            )?,
            callback_url: required(
                &cfg.payment_gateway_callback_url,
                "payment_gateway_callback_url",
            )?,
            return_url: required(
                &cfg.payment_gateway_return_url,
                "payment_gateway_return_url",
            )?,
            ref_prefix: cfg.merchant_ref_prefix.clone(),
        })
    }

    /// Builds a merchant reference unique per attempt. The gateway
    /// deduplicates on this value, so a retry must never reuse one.
    pub fn merchant_ref(&self, transaction_id: Uuid, now: DateTime<Utc>) -> String {
        let tx = transaction_id.simple().to_string();
        format!(
            "{}-{}-{}",
            self.ref_prefix,
            &tx[..12],
            now.timestamp_millis()
        )
    }

    /// HMAC-SHA256 over `merchant_code + merchant_ref + amount`,
    /// keyed by the private key. Signing happens here and nowhere
    /// closer to a client.
    pub fn signature(&self, merchant_ref: &str, amount: i64) -> String {
        let payload = format!("{}{}{}", self.merchant_code, merchant_ref, amount);
        let mut mac = HmacSha256::new_from_slice(self.private_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn integral_amount(amount: Decimal) -> Result<i64, ServiceError> {
        amount.trunc().to_i64().ok_or_else(|| {
            ServiceError::InvalidInput(format!("amount {} is not representable", amount))
        })
    }

    /// Creates a charge at the gateway and returns the checkout URL
    /// plus the gateway-side reference.
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn create_payment(
        &self,
        request: &CreateGatewayPayment,
    ) -> Result<GatewayPaymentSession, ServiceError> {
        let amount = Self::integral_amount(request.amount)?;
        let merchant_ref = self.merchant_ref(request.transaction_id, Utc::now());
        let signature = self.signature(&merchant_ref, amount);

        let body = json!({
            "method": request.channel,
            "merchant_ref": merchant_ref,
            "amount": amount,
            "customer_name": request.customer_name,
            "customer_email": request.customer_email,
            "customer_phone": request.customer_phone,
            "order_items": [{
                "name": request.item_name,
                "price": amount,
                "quantity": 1,
            }],
            "callback_url": self.callback_url,
            "return_url": self.return_url,
            "signature": signature,
        });

        let url = format!("{}/transaction/create", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, body = %text, "gateway returned an error status");
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway returned status {}",
                status
            )));
        }

        let envelope: GatewayEnvelope<CreateData> = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "payment gateway returned a non-JSON response: {}",
                e
            ))
        })?;

        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(ServiceError::GatewayRejected(message));
        }

        let data = envelope.data.ok_or_else(|| {
            ServiceError::ExternalServiceError(
                "payment gateway reported success without payment data".to_string(),
            )
        })?;

        info!(%merchant_ref, reference = %data.reference, "gateway charge created");

        Ok(GatewayPaymentSession {
            merchant_ref,
            reference: data.reference,
            checkout_url: data.checkout_url,
        })
    }

    /// Queries the gateway for the authoritative status of a charge.
    #[instrument(skip(self))]
    pub async fn check_status(
        &self,
        reference: &str,
    ) -> Result<GatewayPaymentStatus, ServiceError> {
        let url = format!("{}/transaction/detail", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("reference", reference)])
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway returned status {}",
                status
            )));
        }

        let envelope: GatewayEnvelope<StatusData> = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "payment gateway returned a non-JSON response: {}",
                e
            ))
        })?;

        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(ServiceError::GatewayRejected(message));
        }

        let raw = envelope
            .data
            .map(|d| d.status)
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(
                    "payment gateway status response had no data".to_string(),
                )
            })?;

        Ok(raw
            .parse::<GatewayPaymentStatus>()
            .unwrap_or_else(|_| GatewayPaymentStatus::Unknown(raw)))
    }
}
