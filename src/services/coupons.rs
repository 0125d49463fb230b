//! Coupon usage ledger. Redemption caps are enforced with a single
//! conditional increment so two concurrent redemptions can never
//! push `current_uses` past `max_uses`.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::entities::coupon;
use crate::errors::ServiceError;

/// Normalizes a coupon code the way it is stored.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds a coupon by code and returns it only if it is currently
    /// usable (active, unexpired, under its redemption cap).
    #[instrument(skip(self))]
    pub async fn find_usable(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        let normalized = normalize_code(code);

        let found = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await?;

        let Some(found) = found else {
            return Ok(None);
        };

        if !found.is_usable(Utc::now()) {
            warn!(code = %normalized, "coupon exists but is not usable");
            return Ok(None);
        }

        Ok(Some(found))
    }

    /// Reserves one use of a coupon on the given connection.
    ///
    /// The cap check and the increment are a single conditional
    /// UPDATE; zero affected rows means the coupon is missing,
    /// inactive, expired or exhausted. Reservations are final: this
    /// ledger never decrements.
    pub async fn reserve<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<coupon::Model, ServiceError> {
        let normalized = normalize_code(code);
        let now = Utc::now();

        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::CurrentUses,
                Expr::col(coupon::Column::CurrentUses).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::ExpiresAt.is_null())
                    .add(coupon::Column::ExpiresAt.gt(now)),
            )
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.eq(0))
                    .add(
                        Expr::col(coupon::Column::CurrentUses)
                            .lt(Expr::col(coupon::Column::MaxUses)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} is invalid, expired or exhausted",
                normalized
            )));
        }

        coupon::Entity::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "coupon {} vanished after reservation",
                    normalized
                ))
            })
    }
}
