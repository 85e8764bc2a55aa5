use crate::models::{TicketResponse, TransactionResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// this call issued the tickets
    Settled,
    /// an earlier call already did, nothing changed
    AlreadySettled,
}

/// Units of a line that could not be issued because capacity ran out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Shortfall {
    pub ticket_type_id: i64,
    pub requested: i32,
    pub issued: i32,
    pub unit_price: i64,
}

impl Shortfall {
    pub fn missing(&self) -> i32 {
        self.requested - self.issued
    }

    pub fn refund_due(&self) -> i64 {
        self.unit_price * i64::from(self.missing())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementOutcome {
    pub status: SettlementStatus,
    pub transaction: TransactionResponse,
    pub tickets: Vec<TicketResponse>,
    pub shortfalls: Vec<Shortfall>,
    /// gross of the units in `shortfalls`
    pub refund_due: i64,
    /// what the organizer was credited for this order
    pub organizer_credit: i64,
}

impl SettlementOutcome {
    pub fn has_shortfall(&self) -> bool {
        !self.shortfalls.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct VerifyPaymentQuery {
    pub reference: String,
}

/// Subset of the Paystack webhook body this service acts on
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaystackWebhookEvent {
    pub event: String,
    pub data: PaystackWebhookData,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaystackWebhookData {
    pub reference: String,
}
