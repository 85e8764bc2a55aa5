use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Per-organizer ledger row. All amounts are minor units and never negative.
/// available_balance + pending_balance + withdrawn_amount <= total_earned
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "organizer_balances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub organizer_id: i64,
    pub total_earned: i64,
    /// withdrawable now
    pub available_balance: i64,
    /// locked by open withdrawal requests
    pub pending_balance: i64,
    /// lifetime paid out (net of withdrawal fees)
    pub withdrawn_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_conserved(&self) -> bool {
        self.available_balance >= 0
            && self.pending_balance >= 0
            && self.withdrawn_amount >= 0
            && self.available_balance + self.pending_balance + self.withdrawn_amount
                <= self.total_earned
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
