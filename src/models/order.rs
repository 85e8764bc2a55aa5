use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub const ORDER_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub ticket_type_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub event_id: i64,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub transaction_id: i64,
    pub reference: String,
    pub authorization_url: String,
    pub access_code: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub currency: String,
}

/// One fulfilled line of a cart, priced at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub ticket_type_id: i64,
    pub quantity: i32,
    pub unit_price: i64,
}

impl OrderLine {
    pub fn subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// Order snapshot attached to the payment intent and stored on the transaction.
/// Settlement rebuilds the tickets to issue from this and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderMetadata {
    pub version: u32,
    pub transaction_id: i64,
    pub event_id: i64,
    pub attendee_id: i64,
    pub ordered_at: DateTime<Utc>,
    pub items: Vec<OrderLine>,
}

impl OrderMetadata {
    pub fn total(&self) -> i64 {
        self.items.iter().map(OrderLine::subtotal).sum()
    }

    pub fn to_value(&self) -> AppResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> AppResult<Self> {
        let metadata: OrderMetadata = serde_json::from_value(value.clone()).map_err(|e| {
            AppError::ValidationError(format!("unreadable order metadata: {e}"))
        })?;
        if metadata.version != ORDER_METADATA_VERSION {
            return Err(AppError::ValidationError(format!(
                "unsupported order metadata version {}",
                metadata.version
            )));
        }
        if metadata.items.is_empty() {
            return Err(AppError::ValidationError(
                "order metadata has no line items".to_string(),
            ));
        }
        if let Some(line) = metadata
            .items
            .iter()
            .find(|l| l.quantity < 1 || l.unit_price < 0)
        {
            return Err(AppError::ValidationError(format!(
                "invalid line for ticket type {}",
                line.ticket_type_id
            )));
        }
        Ok(metadata)
    }
}
