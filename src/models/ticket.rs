use crate::entities::{
    TicketStatus, TransactionStatus, TransactionType, ticket_entity as tk,
    transaction_entity as tx,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TicketResponse {
    pub id: i64,
    pub ticket_number: String,
    pub transaction_id: i64,
    pub event_id: i64,
    pub ticket_type_id: i64,
    pub attendee_id: i64,
    pub status: TicketStatus,
    pub price: i64,
    pub qr_code_url: Option<String>,
    pub pdf_url: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<tk::Model> for TicketResponse {
    fn from(m: tk::Model) -> Self {
        Self {
            id: m.id,
            ticket_number: m.ticket_number,
            transaction_id: m.transaction_id,
            event_id: m.event_id,
            ticket_type_id: m.ticket_type_id,
            attendee_id: m.attendee_id,
            status: m.status,
            price: m.price,
            qr_code_url: m.qr_code_url,
            pdf_url: m.pdf_url,
            checked_in_at: m.checked_in_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: i64,
    pub user_id: i64,
    pub event_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub refund_due: i64,
    pub currency: String,
    pub payment_reference: String,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<tx::Model> for TransactionResponse {
    fn from(m: tx::Model) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            event_id: m.event_id,
            transaction_type: m.transaction_type,
            status: m.status,
            amount: m.amount,
            platform_fee: m.platform_fee,
            net_amount: m.net_amount,
            refund_due: m.refund_due,
            currency: m.currency,
            payment_reference: m.payment_reference,
            failure_reason: m.failure_reason,
            paid_at: m.paid_at,
            created_at: m.created_at,
        }
    }
}

/// Sales summary of one event for its organizer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventStatsResponse {
    pub event_id: i64,
    pub tickets_sold: u64,
    pub tickets_checked_in: u64,
    pub gross_revenue: i64,
    pub platform_fees: i64,
    pub net_revenue: i64,
    pub currency: String,
}

/// Reporting window, `YYYY-MM-DD` dates. `end` covers the whole day.
/// Defaults to the last 30 days.
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct PlatformStatsQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlatformStatsResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_users: u64,
    pub total_organizers: u64,
    pub total_events: u64,
    pub total_tickets_sold: u64,
    /// gross charged on completed purchases
    pub total_revenue: i64,
    /// fees the platform keeps after shortfall refunds
    pub platform_revenue: i64,
    pub refunds_due: i64,
    pub currency: String,
}
