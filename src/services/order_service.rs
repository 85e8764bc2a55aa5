use crate::entities::{
    TransactionStatus, TransactionType, event_entity as ev, ticket_type_entity as tt,
    transaction_entity as tx, user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::external::PaymentGateway;
use crate::models::{
    CreateOrderRequest, CreateOrderResponse, ORDER_METADATA_VERSION, OrderLine, OrderMetadata,
};
use crate::services::settlement_service::mark_failed;
use crate::services::{SettingsProvider, fee_calculator, inventory_guard};
use crate::utils::generate_payment_reference;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Turns a cart into a pending transaction and a payment intent.
/// Inventory is only checked here, nothing is reserved until settlement.
#[derive(Clone)]
pub struct OrderService {
    pool: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    settings: Arc<dyn SettingsProvider>,
}

impl OrderService {
    pub fn new(
        pool: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            pool,
            gateway,
            settings,
        }
    }

    pub async fn create_order(
        &self,
        attendee_id: i64,
        req: CreateOrderRequest,
    ) -> AppResult<CreateOrderResponse> {
        validate_cart(&req)?;

        let attendee = users::Entity::find_by_id(attendee_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {attendee_id}")))?;
        let event = ev::Entity::find_by_id(req.event_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", req.event_id)))?;

        let ids: Vec<i64> = req.items.iter().map(|i| i.ticket_type_id).collect();
        let ticket_types: HashMap<i64, tt::Model> = tt::Entity::find()
            .filter(tt::Column::Id.is_in(ids))
            .all(&self.pool)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        // all-or-nothing: any failing line rejects the cart before anything is written
        let ordered_at = Utc::now();
        let mut lines = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let ticket_type = ticket_types
                .get(&item.ticket_type_id)
                .filter(|t| t.event_id == event.id)
                .ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "ticket type {} does not belong to event {}",
                        item.ticket_type_id, event.id
                    ))
                })?;
            inventory_guard::ensure_available(ticket_type, item.quantity, ordered_at)?;
            lines.push(OrderLine {
                ticket_type_id: ticket_type.id,
                quantity: item.quantity,
                unit_price: ticket_type.price,
            });
        }

        let total: i64 = lines.iter().map(OrderLine::subtotal).sum();
        if total <= 0 {
            return Err(AppError::ValidationError(
                "order total must be positive".to_string(),
            ));
        }
        let settings = self.settings.current().await?;
        let fees = fee_calculator::split(total, settings.platform_fee_bp);
        let reference = generate_payment_reference();

        // the metadata names the transaction id, so insert first then attach it
        let txn = self.pool.begin().await?;
        let created = tx::ActiveModel {
            user_id: Set(attendee.id),
            event_id: Set(Some(event.id)),
            transaction_type: Set(TransactionType::Purchase),
            status: Set(TransactionStatus::Pending),
            amount: Set(fees.gross),
            platform_fee: Set(fees.fee),
            net_amount: Set(fees.net),
            currency: Set(settings.currency.clone()),
            payment_gateway: Set(self.gateway.name().to_string()),
            payment_reference: Set(reference.clone()),
            payment_metadata: Set(None),
            authorization_url: Set(None),
            refund_due: Set(0),
            failure_reason: Set(None),
            paid_at: Set(None),
            created_at: Set(ordered_at),
            updated_at: Set(ordered_at),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let metadata = OrderMetadata {
            version: ORDER_METADATA_VERSION,
            transaction_id: created.id,
            event_id: event.id,
            attendee_id: attendee.id,
            ordered_at,
            items: lines,
        };
        let metadata_value = metadata.to_value()?;
        let mut am = created.into_active_model();
        am.payment_metadata = Set(Some(metadata_value.clone()));
        let created = am.update(&txn).await?;
        txn.commit().await?;

        log::info!(
            "Order created: transaction={}, reference={}, attendee={}, event={}, amount={}, fee={}",
            created.id,
            reference,
            attendee.id,
            event.id,
            fees.gross,
            fees.fee
        );

        let handle = match self
            .gateway
            .initialize(
                &attendee.email,
                fees.gross,
                &settings.currency,
                &reference,
                &metadata_value,
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Payment initialization failed for {reference}: {e}");
                mark_failed(&self.pool, created.id, &format!("payment initialization failed: {e}"))
                    .await?;
                return Err(e);
            }
        };

        let mut am = created.into_active_model();
        am.authorization_url = Set(Some(handle.authorization_url.clone()));
        am.updated_at = Set(Utc::now());
        let created = am.update(&self.pool).await?;

        Ok(CreateOrderResponse {
            transaction_id: created.id,
            reference,
            authorization_url: handle.authorization_url,
            access_code: handle.access_code,
            amount: created.amount,
            platform_fee: created.platform_fee,
            currency: created.currency,
        })
    }
}

fn validate_cart(req: &CreateOrderRequest) -> AppResult<()> {
    if req.items.is_empty() {
        return Err(AppError::ValidationError("cart is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for item in &req.items {
        if item.quantity < 1 {
            return Err(AppError::ValidationError(format!(
                "quantity for ticket type {} must be at least 1",
                item.ticket_type_id
            )));
        }
        if !seen.insert(item.ticket_type_id) {
            return Err(AppError::ValidationError(format!(
                "ticket type {} appears more than once",
                item.ticket_type_id
            )));
        }
    }
    Ok(())
}
