use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Single-row platform configuration, fees in basis points (100bp = 1%)
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "platform_settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub platform_fee_bp: i32,
    pub withdrawal_fee_bp: i32,
    pub min_withdrawal_amount: i64,
    pub currency: String,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
