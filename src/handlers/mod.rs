pub mod common;
pub mod coupons;
pub mod gamepass;
pub mod health;
pub mod payment_webhooks;
pub mod payments;
pub mod stock_tiers;
pub mod transactions;

use std::sync::Arc;
use tracing::{error, warn};

use crate::config::AppConfig;
use crate::crypto::CredentialVault;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::coupons::CouponService;
use crate::services::gamepass::GamepassVerifier;
use crate::services::payment_gateway::PaymentGatewayClient;
use crate::services::transactions::TransactionService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub transactions: Arc<TransactionService>,
    pub coupons: Arc<CouponService>,
    pub gamepass: Arc<GamepassVerifier>,
}

impl AppServices {
    /// Builds the service container. A missing payment-gateway
    /// configuration is reported loudly at startup but does not stop
    /// the server; the affected endpoints answer with a configuration
    /// error until it is fixed.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, crate::errors::ServiceError> {
        let gateway = match PaymentGatewayClient::from_config(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                error!(error = %e, "payment gateway is not configured; payment endpoints will fail");
                None
            }
        };

        let vault = match config.credential_vault_key.as_deref() {
            Some(key) => Some(Arc::new(CredentialVault::from_base64_key(key)?)),
            None => {
                warn!("credential vault key not configured; vialogin intake disabled");
                None
            }
        };

        let verifier = Arc::new(GamepassVerifier::from_config(config)?);

        let transactions = Arc::new(TransactionService::new(
            db_pool.clone(),
            event_sender,
            gateway,
            verifier.clone(),
            vault,
        ));

        Ok(Self {
            transactions,
            coupons: Arc::new(CouponService::new(db_pool)),
            gamepass: verifier,
        })
    }
}
