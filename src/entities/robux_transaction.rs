use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the purchased Robux reach the customer's account.
#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// Fulfilled by purchasing a gamepass the customer created
    #[sea_orm(string_value = "gamepass")]
    Gamepass,
    /// Fulfilled by logging into the account (delivery still planned;
    /// intake and encrypted credential storage only)
    #[sea_orm(string_value = "vialogin")]
    ViaLogin,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Created, awaiting payment
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Payment confirmed by the gateway, fulfillment in progress
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Robux delivered
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Payment or fulfillment did not succeed
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A Robux purchase. Never deleted; terminal rows are the audit trail.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "robux_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub robux_amount: i64,

    /// Pre-discount price
    pub total_price: Decimal,
    /// Payable amount after discount
    pub final_price: Decimal,

    pub method: DeliveryMethod,
    pub status: TransactionStatus,

    pub coupon_code: Option<String>,
    pub discount: Decimal,

    /// Our reference at the payment gateway, unique per attempt
    pub merchant_ref: Option<String>,
    /// The gateway's own reference
    pub payment_reference: Option<String>,
    pub checkout_url: Option<String>,

    pub gamepass_id: Option<i64>,
    pub gamepass_url: Option<String>,

    // Sealed with the credential vault; never serialized outward
    #[serde(skip_serializing)]
    pub credential_ciphertext: Option<String>,
    #[serde(skip_serializing)]
    pub backup_codes_ciphertext: Option<String>,

    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Processing.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }
}
