//! Transaction state machine over an in-memory database, with the
//! gateway faked where a test needs one.
//!
//! Covers end-to-end pricing at creation, atomic coupon reservation,
//! guarded (idempotent) status transitions, payment-reference
//! persistence, verification staleness, and reconciliation.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use sea_orm_migration::MigratorTrait;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use robux_shop_api::config::AppConfig;
use robux_shop_api::crypto::CredentialVault;
use robux_shop_api::entities::{
    coupon::{self, CouponType},
    robux_transaction::{self, DeliveryMethod, TransactionStatus},
    stock_tier,
};
use robux_shop_api::errors::ServiceError;
use robux_shop_api::events;
use robux_shop_api::migrator::Migrator;
use robux_shop_api::services::coupons::CouponService;
use robux_shop_api::services::gamepass::{GamepassCandidate, GamepassVerifier};
use robux_shop_api::services::payment_gateway::PaymentGatewayClient;
use robux_shop_api::services::transactions::{
    CreatePaymentInput, CreateTransactionInput, LoginCredentials, TransactionService,
};

const VAULT_KEY_BYTES: [u8; 32] = [9u8; 32];

async fn setup_db() -> Arc<DatabaseConnection> {
    // A single connection keeps the in-memory database shared and
    // serializes concurrent writers the way production postgres
    // serializes conflicting row updates
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("sqlite connects");
    Migrator::up(&db, None).await.expect("migrations run");
    Arc::new(db)
}

fn test_config(gateway_base: Option<&str>) -> AppConfig {
    let mut value = json!({
        "database_url": "sqlite::memory:",
        "host": "127.0.0.1",
        "environment": "development",
        "verification_signing_secret": "a-perfectly-reasonable-signing-secret-0123456789",
        "credential_vault_key": BASE64.encode(VAULT_KEY_BYTES),
    });
    if let Some(base) = gateway_base {
        let gateway = json!({
            "payment_gateway_base_url": base,
            "payment_gateway_api_key": "api-key",
            "payment_gateway_merchant_code": "M001",
            "payment_gateway_private_key": "private-key",
            "payment_gateway_callback_url": "https://shop.example/api/v1/payments/webhook",
            "payment_gateway_return_url": "https://shop.example/thanks",
            "payment_gateway_timeout_secs": 2,
        });
        for (k, v) in gateway.as_object().unwrap() {
            value[k.as_str()] = v.clone();
        }
    }
    serde_json::from_value(value).expect("test config deserializes")
}

struct TestCtx {
    db: Arc<DatabaseConnection>,
    service: TransactionService,
    verifier: Arc<GamepassVerifier>,
    vault: Arc<CredentialVault>,
}

async fn setup(gateway_base: Option<String>, with_vault: bool) -> TestCtx {
    let db = setup_db().await;
    let cfg = test_config(gateway_base.as_deref());

    let (event_sender, event_receiver) = events::channel(64);
    let _logger = events::spawn_event_logger(event_receiver);

    let verifier = Arc::new(GamepassVerifier::from_config(&cfg).unwrap());
    let gateway = gateway_base
        .as_ref()
        .map(|_| Arc::new(PaymentGatewayClient::from_config(&cfg).unwrap()));
    let vault = Arc::new(
        CredentialVault::from_base64_key(cfg.credential_vault_key.as_deref().unwrap()).unwrap(),
    );

    let service = TransactionService::new(
        db.clone(),
        event_sender,
        gateway,
        verifier.clone(),
        with_vault.then(|| vault.clone()),
    );

    TestCtx {
        db,
        service,
        verifier,
        vault,
    }
}

async fn seed_tier(db: &DatabaseConnection, amount: i64, price: Decimal) {
    stock_tier::ActiveModel {
        id: Set(Uuid::new_v4()),
        amount: Set(amount),
        price: Set(price),
        is_active: Set(true),
        allow_orders: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("tier seeds");
}

async fn seed_coupon(
    db: &DatabaseConnection,
    code: &str,
    coupon_type: CouponType,
    value: Decimal,
    max_uses: i32,
) {
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_uppercase()),
        coupon_type: Set(coupon_type),
        value: Set(value),
        max_uses: Set(max_uses),
        current_uses: Set(0),
        is_active: Set(true),
        expires_at: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("coupon seeds");
}

fn create_input(robux_amount: i64, coupon_code: Option<&str>) -> CreateTransactionInput {
    CreateTransactionInput {
        roblox_user_id: 9001,
        roblox_username: "CoolSeller".into(),
        robux_amount,
        method: DeliveryMethod::Gamepass,
        coupon_code: coupon_code.map(Into::into),
        whatsapp_number: Some("+6281200000000".into()),
        email: Some("cool@example.com".into()),
        login_credentials: None,
    }
}

// ==================== Creation & pricing ====================

#[tokio::test]
async fn creation_prices_exact_tier_with_coupon() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    seed_coupon(&ctx.db, "SAVE10", CouponType::Percentage, dec!(10), 5).await;

    let tx = ctx
        .service
        .create_transaction(create_input(500, Some("save10")))
        .await
        .unwrap();

    assert_eq!(tx.total_price, dec!(70000));
    assert_eq!(tx.discount, dec!(7000));
    assert_eq!(tx.final_price, dec!(63000));
    assert_eq!(tx.status, "pending");
    assert_eq!(tx.coupon_code.as_deref(), Some("SAVE10"));

    // The reservation is recorded
    let reserved = coupon::Entity::find()
        .filter(coupon::Column::Code.eq("SAVE10"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reserved.current_uses, 1);
}

#[tokio::test]
async fn creation_derives_price_from_smallest_tier() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 50, dec!(8000)).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    let tx = ctx
        .service
        .create_transaction(create_input(100, None))
        .await
        .unwrap();

    assert_eq!(tx.total_price, dec!(16000));
    assert_eq!(tx.final_price, dec!(16000));
    assert_eq!(tx.discount, dec!(0));
}

#[tokio::test]
async fn creation_without_any_tier_is_a_validation_error() {
    let ctx = setup(None, false).await;

    let err = ctx
        .service
        .create_transaction(create_input(100, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn invalid_coupon_fails_creation_and_inserts_nothing() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    let err = ctx
        .service
        .create_transaction(create_input(500, Some("NOPE")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let count = robux_transaction::Entity::find()
        .all(&*ctx.db)
        .await
        .unwrap()
        .len();
    assert_eq!(count, 0, "failed creation must not leave a transaction");
}

#[tokio::test]
async fn repeat_customer_updates_contact_fields() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    ctx.service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    let mut second = create_input(500, None);
    second.email = Some("new@example.com".into());
    ctx.service.create_transaction(second).await.unwrap();

    let users = robux_shop_api::entities::user::Entity::find()
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(users.len(), 1, "same platform account, one user row");
    assert_eq!(users[0].email.as_deref(), Some("new@example.com"));
}

// ==================== Coupon cap ====================

#[tokio::test]
async fn coupon_cap_is_enforced_at_the_boundary() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    seed_coupon(&ctx.db, "ONCE", CouponType::Fixed, dec!(5000), 1).await;

    ctx.service
        .create_transaction(create_input(500, Some("ONCE")))
        .await
        .expect("first redemption fits under the cap");

    let err = ctx
        .service
        .create_transaction(create_input(500, Some("ONCE")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let c = coupon::Entity::find()
        .filter(coupon::Column::Code.eq("ONCE"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.current_uses, 1, "cap may never be exceeded");
}

#[tokio::test]
async fn concurrent_reservations_admit_exactly_one() {
    let ctx = setup(None, false).await;
    seed_coupon(&ctx.db, "RACE", CouponType::Fixed, dec!(5000), 1).await;

    let (a, b) = tokio::join!(
        CouponService::reserve(&*ctx.db, "RACE"),
        CouponService::reserve(&*ctx.db, "RACE"),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1, "exactly one reservation may win");

    let c = coupon::Entity::find()
        .filter(coupon::Column::Code.eq("RACE"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.current_uses, 1);
}

// ==================== Guarded transitions ====================

#[tokio::test]
async fn paid_transition_is_idempotent() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    assert!(ctx.service.mark_paid(tx.id).await.unwrap());
    // A replayed webhook or racing reconcile changes nothing
    assert!(!ctx.service.mark_paid(tx.id).await.unwrap());

    let current = ctx.service.get_transaction(tx.id).await.unwrap();
    assert_eq!(current.status, "processing");
}

#[tokio::test]
async fn completion_requires_confirmed_payment() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    // Completing a pending transaction skips payment confirmation
    let err = ctx.service.mark_completed(tx.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    ctx.service.mark_paid(tx.id).await.unwrap();
    let completed = ctx.service.mark_completed(tx.id).await.unwrap();
    assert_eq!(completed.status, "completed");

    // Idempotent for replays
    let again = ctx.service.mark_completed(tx.id).await.unwrap();
    assert_eq!(again.status, "completed");

    // Terminal states never move
    let err = ctx.service.mark_failed(tx.id, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn gateway_expiry_never_fails_a_paid_transaction() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    ctx.service.mark_paid(tx.id).await.unwrap();

    let corrected = ctx
        .service
        .fail_unpaid(tx.id, "gateway reported EXPIRED".into())
        .await
        .unwrap();
    assert!(!corrected);

    let current = ctx.service.get_transaction(tx.id).await.unwrap();
    assert_eq!(current.status, "processing");
}

#[tokio::test]
async fn admin_failure_records_the_reason() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    let failed = ctx
        .service
        .mark_failed(tx.id, Some("customer requested cancellation".into()))
        .await
        .unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("customer requested cancellation")
    );
}

// ==================== Payment creation ====================

fn matched_listing() -> GamepassCandidate {
    GamepassCandidate {
        id: 4242,
        name: "Robux 715".into(),
        price: Some(715),
        is_for_sale: true,
        creator_name: "CoolSeller".into(),
    }
}

#[tokio::test]
async fn payment_creation_persists_gateway_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "reference": "T777",
                "checkout_url": "https://gateway.example/checkout/T777"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = setup(Some(server.uri()), false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    // 500 Robux requires a 715 gamepass; the ticket binds that price
    let ticket = ctx
        .verifier
        .signer()
        .issue(9001, &matched_listing(), 715, Utc::now())
        .unwrap();

    let session = ctx
        .service
        .create_payment(
            tx.id,
            CreatePaymentInput {
                channel: "QRIS".into(),
                verification_ticket: Some(ticket),
            },
        )
        .await
        .unwrap();

    assert_eq!(session.reference, "T777");
    assert!(session.payment_url.contains("checkout"));

    // References are durable before success is reported
    let model = robux_transaction::Entity::find_by_id(tx.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.merchant_ref.as_deref(), Some(session.merchant_ref.as_str()));
    assert_eq!(model.payment_reference.as_deref(), Some("T777"));
    assert_eq!(model.gamepass_id, Some(4242));
    assert!(model.gamepass_url.as_deref().unwrap().contains("4242"));
    assert_eq!(model.status, TransactionStatus::Pending);
    assert!(model.version > 0);
}

#[tokio::test]
async fn stale_verification_blocks_payment_before_any_gateway_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = setup(Some(server.uri()), false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    // Ticket verified against a different amount's required price
    let ticket = ctx
        .verifier
        .signer()
        .issue(9001, &matched_listing(), 143, Utc::now())
        .unwrap();

    let err = ctx
        .service
        .create_payment(
            tx.id,
            CreatePaymentInput {
                channel: "QRIS".into(),
                verification_ticket: Some(ticket),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn gamepass_payment_requires_a_ticket() {
    let server = MockServer::start().await;
    let ctx = setup(Some(server.uri()), false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    let err = ctx
        .service
        .create_payment(
            tx.id,
            CreatePaymentInput {
                channel: "QRIS".into(),
                verification_ticket: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn missing_gateway_configuration_is_distinguishable() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();

    let err = ctx
        .service
        .create_payment(
            tx.id,
            CreatePaymentInput {
                channel: "QRIS".into(),
                verification_ticket: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConfigurationError(_)));
}

// ==================== Reconciliation ====================

async fn attach_payment_attempt(db: &DatabaseConnection, id: Uuid, merchant_ref: &str, reference: &str) {
    let model = robux_transaction::Entity::find_by_id(id)
        .one(db)
        .await
        .unwrap()
        .unwrap();
    let mut active: robux_transaction::ActiveModel = model.into();
    active.merchant_ref = Set(Some(merchant_ref.to_string()));
    active.payment_reference = Set(Some(reference.to_string()));
    active.update(db).await.unwrap();
}

#[tokio::test]
async fn reconciliation_corrects_paid_drift_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/detail"))
        .and(query_param("reference", "T900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "PAID" }
        })))
        .mount(&server)
        .await;

    let ctx = setup(Some(server.uri()), false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();
    attach_payment_attempt(&ctx.db, tx.id, "RBX-drifted-1", "T900").await;

    // The webhook was lost: gateway says PAID, local row still pending
    let first = ctx.service.reconcile("RBX-drifted-1").await.unwrap();
    assert_eq!(first.gateway_status, "PAID");
    assert!(first.corrected);
    assert_eq!(first.local_status, "processing");

    // Idempotent under double invocation
    let second = ctx.service.reconcile("RBX-drifted-1").await.unwrap();
    assert!(!second.corrected);
    assert_eq!(second.local_status, "processing");
}

#[tokio::test]
async fn reconciliation_fails_expired_pending_payments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "EXPIRED" }
        })))
        .mount(&server)
        .await;

    let ctx = setup(Some(server.uri()), false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;
    let tx = ctx
        .service
        .create_transaction(create_input(500, None))
        .await
        .unwrap();
    attach_payment_attempt(&ctx.db, tx.id, "RBX-expired-1", "T901").await;

    let report = ctx.service.reconcile("RBX-expired-1").await.unwrap();
    assert!(report.corrected);
    assert_eq!(report.local_status, "failed");

    let model = robux_transaction::Entity::find_by_id(tx.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert!(model
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("EXPIRED"));
}

#[tokio::test]
async fn reconciliation_of_unknown_reference_is_not_found() {
    let server = MockServer::start().await;
    let ctx = setup(Some(server.uri()), false).await;

    let err = ctx.service.reconcile("RBX-missing").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

// ==================== ViaLogin intake ====================

fn vialogin_input() -> CreateTransactionInput {
    CreateTransactionInput {
        roblox_user_id: 9002,
        roblox_username: "LoginBuyer".into(),
        robux_amount: 500,
        method: DeliveryMethod::ViaLogin,
        coupon_code: None,
        whatsapp_number: None,
        email: None,
        login_credentials: Some(LoginCredentials {
            username: "LoginBuyer".into(),
            password: "hunter2".into(),
            backup_codes: Some("1111 2222".into()),
        }),
    }
}

#[tokio::test]
async fn vialogin_without_vault_is_a_configuration_error() {
    let ctx = setup(None, false).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    let err = ctx
        .service
        .create_transaction(vialogin_input())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConfigurationError(_)));
}

#[tokio::test]
async fn vialogin_credentials_are_sealed_at_rest() {
    let ctx = setup(None, true).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    let tx = ctx
        .service
        .create_transaction(vialogin_input())
        .await
        .unwrap();

    let model = robux_transaction::Entity::find_by_id(tx.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();

    let ciphertext = model.credential_ciphertext.expect("credentials stored");
    assert!(!ciphertext.contains("hunter2"));

    let plaintext = ctx.vault.open(&ciphertext).unwrap();
    assert!(plaintext.contains("hunter2"));

    let backup = model.backup_codes_ciphertext.expect("backup codes stored");
    assert_eq!(ctx.vault.open(&backup).unwrap(), "1111 2222");
}

#[tokio::test]
async fn vialogin_without_credentials_is_a_validation_error() {
    let ctx = setup(None, true).await;
    seed_tier(&ctx.db, 500, dec!(70000)).await;

    let mut input = vialogin_input();
    input.login_credentials = None;
    let err = ctx.service.create_transaction(input).await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}
