use crate::entities::organizer_balance_entity as ob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub organizer_id: i64,
    pub total_earned: i64,
    pub available_balance: i64,
    pub pending_balance: i64,
    pub withdrawn_amount: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<ob::Model> for BalanceResponse {
    fn from(m: ob::Model) -> Self {
        Self {
            organizer_id: m.organizer_id,
            total_earned: m.total_earned,
            available_balance: m.available_balance,
            pending_balance: m.pending_balance,
            withdrawn_amount: m.withdrawn_amount,
            updated_at: m.updated_at,
        }
    }
}
