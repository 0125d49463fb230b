use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer, keyed by their Roblox account. Created on first
/// transaction; contact fields refresh on subsequent transactions.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub roblox_user_id: i64,

    pub roblox_username: String,
    pub whatsapp_number: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::robux_transaction::Entity")]
    RobuxTransactions,
}

impl Related<super::robux_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RobuxTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
