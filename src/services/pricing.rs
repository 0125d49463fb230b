//! Pure pricing computations: tier-based base price, coupon
//! discounts, and the gamepass price the marketplace cut requires.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::entities::{
    coupon::{self, CouponType},
    stock_tier,
};
use crate::errors::ServiceError;

/// Outcome of applying a coupon to a base price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountOutcome {
    pub discount: Decimal,
    pub final_price: Decimal,
}

/// Computes the payable base price for `requested` Robux.
///
/// An active, order-allowed tier whose amount matches exactly wins.
/// Otherwise the price is derived proportionally from the smallest
/// active+orderable tier. No orderable tier at all is a hard error,
/// never a silent zero.
pub fn base_price(
    requested: i64,
    tiers: &[stock_tier::Model],
) -> Result<Decimal, ServiceError> {
    if requested <= 0 {
        return Err(ServiceError::ValidationError(
            "Requested Robux amount must be positive".to_string(),
        ));
    }

    let orderable: Vec<&stock_tier::Model> =
        tiers.iter().filter(|t| t.is_orderable()).collect();

    if let Some(exact) = orderable.iter().find(|t| t.amount == requested) {
        return Ok(exact.price);
    }

    let smallest = orderable
        .iter()
        .min_by_key(|t| t.amount)
        .ok_or_else(|| {
            ServiceError::ValidationError(
                "No active stock tier is available for ordering".to_string(),
            )
        })?;

    let derived = smallest.price * Decimal::from(requested) / Decimal::from(smallest.amount);
    Ok(derived.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
}

/// Applies an optional coupon to a base price. Side-effect free and
/// safe to call repeatedly; the final price is clamped at zero.
pub fn apply_discount(base: Decimal, coupon: Option<&coupon::Model>) -> DiscountOutcome {
    let discount = match coupon {
        None => Decimal::ZERO,
        Some(c) => match c.coupon_type {
            CouponType::Percentage => (base * c.value / dec!(100))
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            CouponType::Fixed => c.value,
        },
    };

    let final_price = (base - discount).max(Decimal::ZERO);
    DiscountOutcome {
        discount,
        final_price,
    }
}

/// The price the customer's gamepass must be listed at so that the
/// marketplace's cut still nets the requested amount.
pub fn required_gamepass_price(robux_amount: i64) -> i64 {
    (Decimal::from(robux_amount) * dec!(1.43))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}
