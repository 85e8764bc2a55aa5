use crate::entities::{WithdrawalStatus, withdrawal_request_entity as wr};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWithdrawalRequest {
    /// minor currency units
    pub amount: i64,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewWithdrawalRequest {
    pub action: ReviewAction,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessWithdrawalRequest {
    /// payout reference from the bank or transfer provider
    pub transaction_ref: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct WithdrawalListQuery {
    pub status: Option<WithdrawalStatus>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalResponse {
    pub id: i64,
    pub organizer_id: i64,
    pub amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    pub status: WithdrawalStatus,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<wr::Model> for WithdrawalResponse {
    fn from(m: wr::Model) -> Self {
        Self {
            id: m.id,
            organizer_id: m.organizer_id,
            amount: m.amount,
            fee: m.fee,
            net_amount: m.net_amount,
            status: m.status,
            bank_name: m.bank_name,
            account_number: m.account_number,
            account_name: m.account_name,
            reviewed_by: m.reviewed_by,
            reviewed_at: m.reviewed_at,
            review_comment: m.review_comment,
            processed_at: m.processed_at,
            transaction_ref: m.transaction_ref,
            created_at: m.created_at,
        }
    }
}
