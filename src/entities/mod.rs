pub mod coupon;
pub mod robux_transaction;
pub mod stock_tier;
pub mod user;
