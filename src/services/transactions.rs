//! Transaction lifecycle orchestration.
//!
//! The only component allowed to mutate persisted purchase state.
//! Every status change goes through one guarded conditional update
//! (`WHERE id = ? AND status = ?`), which is what makes the webhook
//! and manual reconciliation idempotent with respect to each other.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::crypto::CredentialVault;
use crate::entities::{
    robux_transaction::{self, DeliveryMethod, TransactionStatus},
    stock_tier, user,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::CouponService;
use crate::services::gamepass::{self, GamepassVerifier};
use crate::services::payment_gateway::{
    CreateGatewayPayment, GatewayPaymentStatus, PaymentGatewayClient,
};
use crate::services::pricing;

/// Account credentials supplied for vialogin delivery. Sealed at rest
/// and never echoed back.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginCredentials {
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    #[validate(length(min = 1, max = 200))]
    pub password: String,
    pub backup_codes: Option<String>,
}

/// Request to create a transaction.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateTransactionInput {
    #[validate(range(min = 1))]
    pub roblox_user_id: i64,

    #[validate(length(min = 1, max = 50))]
    pub roblox_username: String,

    #[validate(range(min = 1))]
    pub robux_amount: i64,

    pub method: DeliveryMethod,

    pub coupon_code: Option<String>,
    pub whatsapp_number: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    /// Required when `method` is `vialogin`
    #[validate]
    pub login_credentials: Option<LoginCredentials>,
}

/// Request to attach a payment to a pending transaction.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentInput {
    /// Gateway payment channel, e.g. "QRIS"
    #[validate(length(min = 1, max = 32))]
    pub channel: String,

    /// Verification ticket from a successful gamepass verification.
    /// Required for the gamepass delivery method.
    pub verification_ticket: Option<String>,
}

/// Transaction as exposed over the API. Credential ciphertexts never
/// appear here.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub robux_amount: i64,
    pub total_price: rust_decimal::Decimal,
    pub final_price: rust_decimal::Decimal,
    pub method: String,
    pub status: String,
    pub coupon_code: Option<String>,
    pub discount: rust_decimal::Decimal,
    pub merchant_ref: Option<String>,
    pub payment_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub gamepass_id: Option<i64>,
    pub gamepass_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

impl From<robux_transaction::Model> for TransactionResponse {
    fn from(model: robux_transaction::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            robux_amount: model.robux_amount,
            total_price: model.total_price,
            final_price: model.final_price,
            method: model.method.to_value(),
            status: model.status.to_value(),
            coupon_code: model.coupon_code,
            discount: model.discount,
            merchant_ref: model.merchant_ref,
            payment_reference: model.payment_reference,
            checkout_url: model.checkout_url,
            gamepass_id: model.gamepass_id,
            gamepass_url: model.gamepass_url,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Result of attaching a payment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentSessionResponse {
    pub transaction_id: Uuid,
    pub merchant_ref: String,
    pub reference: String,
    pub payment_url: String,
}

/// Result of reconciling local state against the gateway.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationReport {
    pub transaction_id: Uuid,
    pub merchant_ref: String,
    pub gateway_status: String,
    pub local_status: String,
    /// Whether this invocation changed the local status
    pub corrected: bool,
}

pub struct TransactionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Option<Arc<PaymentGatewayClient>>,
    verifier: Arc<GamepassVerifier>,
    vault: Option<Arc<CredentialVault>>,
}

impl TransactionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Option<Arc<PaymentGatewayClient>>,
        verifier: Arc<GamepassVerifier>,
        vault: Option<Arc<CredentialVault>>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            verifier,
            vault,
        }
    }

    fn gateway(&self) -> Result<&Arc<PaymentGatewayClient>, ServiceError> {
        self.gateway.as_ref().ok_or_else(|| {
            ServiceError::ConfigurationError("payment gateway is not configured".to_string())
        })
    }

    /// Validates if a status transition is allowed
    fn is_valid_transition(from: &TransactionStatus, to: &TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (from, to),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Applies a guarded status transition. Returns whether this call
    /// changed the row; zero affected rows means the transition
    /// already happened or the state moved underneath us.
    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        failure_reason: Option<String>,
    ) -> Result<bool, ServiceError> {
        if !Self::is_valid_transition(&from, &to) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot transition from '{}' to '{}'",
                from.as_str(),
                to.as_str()
            )));
        }

        let mut update = robux_transaction::Entity::update_many()
            .col_expr(
                robux_transaction::Column::Status,
                Expr::value(to.clone()),
            )
            .col_expr(
                robux_transaction::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .col_expr(
                robux_transaction::Column::Version,
                Expr::col(robux_transaction::Column::Version).add(1),
            );
        if let Some(reason) = failure_reason {
            update = update.col_expr(
                robux_transaction::Column::FailureReason,
                Expr::value(reason),
            );
        }

        let result = update
            .filter(robux_transaction::Column::Id.eq(id))
            .filter(robux_transaction::Column::Status.eq(from.clone()))
            .exec(&*self.db)
            .await?;

        let changed = result.rows_affected > 0;
        if changed {
            info!(
                transaction_id = %id,
                from = from.as_str(),
                to = to.as_str(),
                "transaction status changed"
            );
            if let Err(e) = self
                .event_sender
                .send(Event::TransactionStatusChanged {
                    transaction_id: id,
                    old_status: from.as_str().to_string(),
                    new_status: to.as_str().to_string(),
                })
                .await
            {
                warn!(error = %e, "failed to send status change event");
            }
        }
        Ok(changed)
    }

    /// Creates a `pending` transaction: prices the request, reserves
    /// the coupon atomically with the insert, and upserts the user.
    #[instrument(skip(self, input), fields(roblox_user_id = input.roblox_user_id))]
    pub async fn create_transaction(
        &self,
        input: CreateTransactionInput,
    ) -> Result<TransactionResponse, ServiceError> {
        input.validate()?;

        // Vialogin intake needs both credentials and a configured vault
        let sealed_credentials = match input.method {
            DeliveryMethod::ViaLogin => {
                let credentials = input.login_credentials.as_ref().ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Account credentials are required for vialogin delivery".to_string(),
                    )
                })?;
                let vault = self.vault.as_ref().ok_or_else(|| {
                    ServiceError::ConfigurationError(
                        "credential vault key is not configured".to_string(),
                    )
                })?;
                let credential_ciphertext = vault.seal(&format!(
                    "{}\n{}",
                    credentials.username, credentials.password
                ))?;
                let backup_codes_ciphertext = credentials
                    .backup_codes
                    .as_deref()
                    .map(|codes| vault.seal(codes))
                    .transpose()?;
                Some((credential_ciphertext, backup_codes_ciphertext))
            }
            DeliveryMethod::Gamepass => None,
        };

        let tiers = stock_tier::Entity::find()
            .filter(stock_tier::Column::IsActive.eq(true))
            .filter(stock_tier::Column::AllowOrders.eq(true))
            .all(&*self.db)
            .await?;
        let base = pricing::base_price(input.robux_amount, &tiers)?;

        let txn = self.db.begin().await?;

        let coupon = match input.coupon_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(CouponService::reserve(&txn, code).await?),
            _ => None,
        };
        let outcome = pricing::apply_discount(base, coupon.as_ref());

        let user = Self::upsert_user(&txn, &input).await?;

        let now = Utc::now();
        let transaction_id = Uuid::new_v4();
        let (credential_ciphertext, backup_codes_ciphertext) = match sealed_credentials {
            Some((c, b)) => (Some(c), b),
            None => (None, None),
        };

        let model = robux_transaction::ActiveModel {
            id: Set(transaction_id),
            user_id: Set(user.id),
            robux_amount: Set(input.robux_amount),
            total_price: Set(base),
            final_price: Set(outcome.final_price),
            method: Set(input.method.clone()),
            status: Set(TransactionStatus::Pending),
            coupon_code: Set(coupon.as_ref().map(|c| c.code.clone())),
            discount: Set(outcome.discount),
            merchant_ref: Set(None),
            payment_reference: Set(None),
            checkout_url: Set(None),
            gamepass_id: Set(None),
            gamepass_url: Set(None),
            credential_ciphertext: Set(credential_ciphertext),
            backup_codes_ciphertext: Set(backup_codes_ciphertext),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(0),
        };

        let inserted = model.insert(&txn).await?;
        txn.commit().await?;

        info!(
            transaction_id = %transaction_id,
            robux_amount = input.robux_amount,
            final_price = %inserted.final_price,
            "transaction created"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::TransactionCreated(transaction_id))
            .await
        {
            warn!(error = %e, "failed to send transaction created event");
        }
        if let Some(ref c) = coupon {
            if let Err(e) = self
                .event_sender
                .send(Event::CouponRedeemed {
                    transaction_id,
                    code: c.code.clone(),
                })
                .await
            {
                warn!(error = %e, "failed to send coupon redeemed event");
            }
        }

        Ok(inserted.into())
    }

    async fn upsert_user<C: ConnectionTrait>(
        conn: &C,
        input: &CreateTransactionInput,
    ) -> Result<user::Model, ServiceError> {
        let existing = user::Entity::find()
            .filter(user::Column::RobloxUserId.eq(input.roblox_user_id))
            .one(conn)
            .await?;

        let now = Utc::now();
        match existing {
            Some(found) => {
                let mut active: user::ActiveModel = found.into();
                active.roblox_username = Set(input.roblox_username.clone());
                if input.whatsapp_number.is_some() {
                    active.whatsapp_number = Set(input.whatsapp_number.clone());
                }
                if input.email.is_some() {
                    active.email = Set(input.email.clone());
                }
                active.updated_at = Set(Some(now));
                Ok(active.update(conn).await?)
            }
            None => {
                let model = user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    roblox_user_id: Set(input.roblox_user_id),
                    roblox_username: Set(input.roblox_username.clone()),
                    whatsapp_number: Set(input.whatsapp_number.clone()),
                    email: Set(input.email.clone()),
                    created_at: Set(now),
                    updated_at: Set(None),
                };
                Ok(model.insert(conn).await?)
            }
        }
    }

    /// Creates a gateway charge for a pending transaction and records
    /// the gateway references before reporting success.
    ///
    /// For the gamepass method the verification ticket is checked for
    /// staleness against the price recomputed from the transaction's
    /// current amount, immediately before use.
    #[instrument(skip(self, input), fields(transaction_id = %transaction_id))]
    pub async fn create_payment(
        &self,
        transaction_id: Uuid,
        input: CreatePaymentInput,
    ) -> Result<PaymentSessionResponse, ServiceError> {
        input.validate()?;
        let gateway = self.gateway()?.clone();

        let tx = self.find_model(transaction_id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "payment can only be created for a pending transaction (status is '{}')",
                tx.status.to_value()
            )));
        }

        let user = user::Entity::find_by_id(tx.user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("user {} missing for transaction", tx.user_id))
            })?;

        // Gamepass delivery: the verification must be current
        let gamepass_fields = match tx.method {
            DeliveryMethod::Gamepass => {
                let token = input.verification_ticket.as_deref().ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Gamepass verification is required before payment".to_string(),
                    )
                })?;
                let ticket = self.verifier.signer().decode(token, Utc::now())?;

                if ticket.platform_user_id != user.roblox_user_id {
                    return Err(ServiceError::ValidationError(
                        "Gamepass verification belongs to a different account".to_string(),
                    ));
                }

                let required = pricing::required_gamepass_price(tx.robux_amount);
                if ticket.required_price != required {
                    return Err(ServiceError::ValidationError(
                        "The requested amount changed since verification, please verify again"
                            .to_string(),
                    ));
                }

                Some((ticket.gamepass_id, gamepass::gamepass_url(ticket.gamepass_id)))
            }
            DeliveryMethod::ViaLogin => None,
        };

        let session = gateway
            .create_payment(&CreateGatewayPayment {
                transaction_id: tx.id,
                channel: input.channel.clone(),
                amount: tx.final_price,
                customer_name: user.roblox_username.clone(),
                customer_email: user.email.clone(),
                customer_phone: user.whatsapp_number.clone(),
                item_name: format!("{} Robux", tx.robux_amount),
            })
            .await?;

        // The gateway references must be durable before we report
        // success. A failure here leaves a charge we do not know
        // about; surface it for reconciliation instead of swallowing.
        let mut update = robux_transaction::Entity::update_many()
            .col_expr(
                robux_transaction::Column::MerchantRef,
                Expr::value(session.merchant_ref.clone()),
            )
            .col_expr(
                robux_transaction::Column::PaymentReference,
                Expr::value(session.reference.clone()),
            )
            .col_expr(
                robux_transaction::Column::CheckoutUrl,
                Expr::value(session.checkout_url.clone()),
            )
            .col_expr(
                robux_transaction::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .col_expr(
                robux_transaction::Column::Version,
                Expr::col(robux_transaction::Column::Version).add(1),
            );
        if let Some((gamepass_id, gamepass_url)) = gamepass_fields {
            update = update
                .col_expr(
                    robux_transaction::Column::GamepassId,
                    Expr::value(gamepass_id),
                )
                .col_expr(
                    robux_transaction::Column::GamepassUrl,
                    Expr::value(gamepass_url),
                );
        }

        let persisted = update
            .filter(robux_transaction::Column::Id.eq(tx.id))
            .filter(robux_transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&*self.db)
            .await;

        match persisted {
            Ok(result) if result.rows_affected > 0 => {}
            Ok(_) => {
                error!(
                    transaction_id = %tx.id,
                    merchant_ref = %session.merchant_ref,
                    "transaction left pending state while the charge was being created"
                );
                return Err(ServiceError::ConsistencyError(format!(
                    "a gateway charge {} was created but the transaction is no longer pending; reconcile merchant_ref {}",
                    session.reference, session.merchant_ref
                )));
            }
            Err(e) => {
                error!(
                    transaction_id = %tx.id,
                    merchant_ref = %session.merchant_ref,
                    error = %e,
                    "failed to record gateway references after charge creation"
                );
                return Err(ServiceError::ConsistencyError(format!(
                    "a gateway charge {} was created but could not be recorded; reconcile merchant_ref {}",
                    session.reference, session.merchant_ref
                )));
            }
        }

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCreated {
                transaction_id: tx.id,
                merchant_ref: session.merchant_ref.clone(),
                reference: session.reference.clone(),
            })
            .await
        {
            warn!(error = %e, "failed to send payment created event");
        }

        Ok(PaymentSessionResponse {
            transaction_id: tx.id,
            merchant_ref: session.merchant_ref,
            reference: session.reference,
            payment_url: session.checkout_url,
        })
    }

    /// `pending -> processing` on an authenticated paid signal.
    /// Idempotent: replays change nothing and return `false`.
    pub async fn mark_paid(&self, id: Uuid) -> Result<bool, ServiceError> {
        self.transition(id, TransactionStatus::Pending, TransactionStatus::Processing, None)
            .await
    }

    /// `pending -> failed` on gateway expiry/cancellation. A
    /// transaction whose payment was already confirmed is left alone.
    pub async fn fail_unpaid(&self, id: Uuid, reason: String) -> Result<bool, ServiceError> {
        self.transition(
            id,
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            Some(reason),
        )
        .await
    }

    /// `processing -> completed` on fulfillment confirmation.
    pub async fn mark_completed(&self, id: Uuid) -> Result<TransactionResponse, ServiceError> {
        let changed = self
            .transition(
                id,
                TransactionStatus::Processing,
                TransactionStatus::Completed,
                None,
            )
            .await?;

        let tx = self.find_model(id).await?;
        if !changed && tx.status != TransactionStatus::Completed {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot complete a transaction in status '{}'",
                tx.status.to_value()
            )));
        }
        Ok(tx.into())
    }

    /// `pending|processing -> failed`. Idempotent when already failed.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<TransactionResponse, ServiceError> {
        let mut changed = self
            .transition(
                id,
                TransactionStatus::Pending,
                TransactionStatus::Failed,
                reason.clone(),
            )
            .await?;
        if !changed {
            changed = self
                .transition(
                    id,
                    TransactionStatus::Processing,
                    TransactionStatus::Failed,
                    reason,
                )
                .await?;
        }

        let tx = self.find_model(id).await?;
        if !changed && tx.status != TransactionStatus::Failed {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot fail a transaction in status '{}'",
                tx.status.to_value()
            )));
        }
        Ok(tx.into())
    }

    /// Re-queries the gateway for the charge behind `merchant_ref`
    /// and corrects local drift. Safe to invoke repeatedly: the
    /// guarded transition makes the correction fire at most once.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        merchant_ref: &str,
    ) -> Result<ReconciliationReport, ServiceError> {
        let gateway = self.gateway()?.clone();

        let tx = robux_transaction::Entity::find()
            .filter(robux_transaction::Column::MerchantRef.eq(merchant_ref))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no transaction with merchant reference {}",
                    merchant_ref
                ))
            })?;

        let reference = tx.payment_reference.clone().ok_or_else(|| {
            ServiceError::ConsistencyError(format!(
                "transaction {} has a merchant reference but no gateway reference",
                tx.id
            ))
        })?;

        let gateway_status = gateway.check_status(&reference).await?;

        let corrected = match gateway_status {
            GatewayPaymentStatus::Paid => {
                if tx.status == TransactionStatus::Pending {
                    warn!(
                        transaction_id = %tx.id,
                        "gateway reports PAID while local status is pending, correcting"
                    );
                }
                self.mark_paid(tx.id).await?
            }
            GatewayPaymentStatus::Expired | GatewayPaymentStatus::Failed => {
                self.fail_unpaid(tx.id, format!("gateway reported {}", gateway_status))
                    .await?
            }
            GatewayPaymentStatus::Refund => {
                warn!(
                    transaction_id = %tx.id,
                    "gateway reports REFUND; leaving local status for operator review"
                );
                false
            }
            GatewayPaymentStatus::Unpaid | GatewayPaymentStatus::Unknown(_) => false,
        };

        let current = self.find_model(tx.id).await?;

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentReconciled {
                transaction_id: tx.id,
                gateway_status: gateway_status.to_string(),
                corrected,
            })
            .await
        {
            warn!(error = %e, "failed to send reconciliation event");
        }

        Ok(ReconciliationReport {
            transaction_id: tx.id,
            merchant_ref: merchant_ref.to_string(),
            gateway_status: gateway_status.to_string(),
            local_status: current.status.to_value(),
            corrected,
        })
    }

    async fn find_model(&self, id: Uuid) -> Result<robux_transaction::Model, ServiceError> {
        robux_transaction::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<TransactionResponse, ServiceError> {
        Ok(self.find_model(id).await?.into())
    }

    /// Looks a transaction up by the merchant reference the gateway
    /// echoes back in webhooks.
    pub async fn find_by_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> Result<Option<robux_transaction::Model>, ServiceError> {
        Ok(robux_transaction::Entity::find()
            .filter(robux_transaction::Column::MerchantRef.eq(merchant_ref))
            .one(&*self.db)
            .await?)
    }

    pub async fn list_transactions(
        &self,
        page: u64,
        per_page: u64,
        status: Option<TransactionStatus>,
    ) -> Result<(Vec<TransactionResponse>, u64), ServiceError> {
        let mut query = robux_transaction::Entity::find()
            .order_by_desc(robux_transaction::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(robux_transaction::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((models.into_iter().map(Into::into).collect(), total))
    }
}
