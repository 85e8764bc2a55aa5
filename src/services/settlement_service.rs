use crate::entities::{
    TicketStatus, TransactionStatus, TransactionType, event_entity as ev, ticket_entity as tk,
    ticket_type_entity as tt, transaction_entity as tx, user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::external::{
    Notification, NotificationDispatcher, NotificationKind, PaymentGateway, TicketAssetPipeline,
    VerificationOutcome,
};
use crate::models::{OrderLine, OrderMetadata, SettlementOutcome, SettlementStatus, Shortfall};
use crate::services::ticket_service::{render_and_store, tickets_of_transaction};
use crate::services::{BalanceService, fee_calculator, inventory_guard};
use crate::utils::generate_ticket_number;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Reason recorded when a pending order outlives its confirmation window
pub const EXPIRED_REASON: &str = "payment confirmation window elapsed";

/// Attempts at the guarded `sold` increment before giving up on a contended line
const MAX_GRANT_ATTEMPTS: usize = 5;

/// Confirms payments and fulfils orders. `settle` may be called any number
/// of times, concurrently, for the same reference: the pending -> completed
/// compare-and-set inside one database transaction lets exactly one call
/// issue tickets and credit the organizer.
#[derive(Clone)]
pub struct SettlementService {
    pool: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    balances: BalanceService,
    notifier: NotificationDispatcher,
    assets: Arc<dyn TicketAssetPipeline>,
    verify_timeout: Duration,
}

impl SettlementService {
    pub fn new(
        pool: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        balances: BalanceService,
        notifier: NotificationDispatcher,
        assets: Arc<dyn TicketAssetPipeline>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            gateway,
            balances,
            notifier,
            assets,
            verify_timeout,
        }
    }

    pub async fn settle(&self, reference: &str) -> AppResult<SettlementOutcome> {
        let transaction = find_by_reference(&self.pool, reference).await?;
        if transaction.status == TransactionStatus::Completed {
            return self.already_settled(transaction).await;
        }
        if !transaction
            .status
            .can_transition_to(TransactionStatus::Completed)
        {
            return Err(AppError::Conflict(format!(
                "transaction {reference} is {} and cannot be settled",
                transaction.status
            )));
        }
        if transaction.transaction_type != TransactionType::Purchase {
            return Err(AppError::Conflict(format!(
                "transaction {reference} is not a purchase"
            )));
        }

        // never trust the client: ask the gateway ourselves
        let verification =
            match tokio::time::timeout(self.verify_timeout, self.gateway.verify(reference)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    log::warn!("Payment verification timed out: reference={reference}");
                    return Err(AppError::ExternalApiError(format!(
                        "payment verification for {reference} timed out"
                    )));
                }
            };

        match &verification.outcome {
            VerificationOutcome::Success => {}
            VerificationOutcome::Failure(reason) => {
                return self.fail(&transaction, reason).await;
            }
            VerificationOutcome::Pending(status) => {
                return Err(AppError::Conflict(format!(
                    "payment {reference} is not complete yet (status: {status})"
                )));
            }
        }
        if verification.amount_confirmed != transaction.amount
            || !verification
                .currency
                .eq_ignore_ascii_case(&transaction.currency)
        {
            let reason = format!(
                "amount mismatch: expected {} {}, gateway confirmed {} {}",
                transaction.amount,
                transaction.currency,
                verification.amount_confirmed,
                verification.currency
            );
            return self.fail(&transaction, &reason).await;
        }

        let metadata = match verification.metadata_echo.as_ref() {
            Some(echo) => OrderMetadata::from_value(echo).or_else(|e| {
                log::warn!("Unusable metadata echo for {reference}, using stored copy: {e}");
                stored_metadata(&transaction)
            })?,
            None => stored_metadata(&transaction)?,
        };
        if metadata.transaction_id != transaction.id || metadata.total() != transaction.amount {
            return self
                .fail(&transaction, "payment metadata does not match the order")
                .await;
        }

        let txn = self.pool.begin().await?;
        let claimed = tx::Entity::update_many()
            .col_expr(tx::Column::Status, Expr::value(TransactionStatus::Completed))
            .col_expr(tx::Column::PaidAt, Expr::value(Some(Utc::now())))
            .col_expr(tx::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tx::Column::Id.eq(transaction.id))
            .filter(tx::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            // a concurrent call won the claim
            txn.rollback().await?;
            let current = find_by_reference(&self.pool, reference).await?;
            return match current.status {
                TransactionStatus::Completed => self.already_settled(current).await,
                status => Err(AppError::Conflict(format!(
                    "transaction {reference} is {status} and cannot be settled"
                ))),
            };
        }

        let fulfilment = self.fulfil(&txn, &transaction, &metadata).await?;
        txn.commit().await?;

        let transaction = find_by_reference(&self.pool, reference).await?;
        log::info!(
            "Settled {}: transaction={}, tickets={}, shortfall_units={}, refund_due={}, organizer_credit={}",
            reference,
            transaction.id,
            fulfilment.tickets.len(),
            fulfilment.shortfalls.iter().map(Shortfall::missing).sum::<i32>(),
            transaction.refund_due,
            fulfilment.organizer_credit
        );

        self.after_commit(&transaction, &metadata, &fulfilment).await;

        Ok(SettlementOutcome {
            status: SettlementStatus::Settled,
            refund_due: transaction.refund_due,
            organizer_credit: fulfilment.organizer_credit,
            shortfalls: fulfilment.shortfalls,
            tickets: fulfilment.tickets.into_iter().map(Into::into).collect(),
            transaction: transaction.into(),
        })
    }

    /// Issues tickets, moves `sold` counters and credits the organizer,
    /// all inside the claiming transaction.
    async fn fulfil(
        &self,
        txn: &DatabaseTransaction,
        transaction: &tx::Model,
        metadata: &OrderMetadata,
    ) -> AppResult<Fulfilment> {
        let mut shortfalls = Vec::new();
        let now = Utc::now();

        for line in &metadata.items {
            let issued = grant_units(txn, line, metadata.ordered_at).await?;
            if issued < line.quantity {
                log::warn!(
                    "Capacity shortfall on {}: ticket_type={}, requested={}, issued={}",
                    transaction.payment_reference,
                    line.ticket_type_id,
                    line.quantity,
                    issued
                );
                shortfalls.push(Shortfall {
                    ticket_type_id: line.ticket_type_id,
                    requested: line.quantity,
                    issued,
                    unit_price: line.unit_price,
                });
            }
            if issued == 0 {
                continue;
            }

            let batch: Vec<tk::ActiveModel> = (0..issued)
                .map(|_| tk::ActiveModel {
                    ticket_number: Set(generate_ticket_number()),
                    transaction_id: Set(transaction.id),
                    event_id: Set(metadata.event_id),
                    ticket_type_id: Set(line.ticket_type_id),
                    attendee_id: Set(metadata.attendee_id),
                    status: Set(TicketStatus::Confirmed),
                    // price as ordered, not the type's current price
                    price: Set(line.unit_price),
                    qr_code_url: Set(None),
                    pdf_url: Set(None),
                    checked_in_at: Set(None),
                    checked_in_by: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .collect();
            tk::Entity::insert_many(batch).exec(txn).await?;
        }
        let tickets = tickets_of_transaction(txn, transaction.id).await?;

        let refund_due: i64 = shortfalls.iter().map(Shortfall::refund_due).sum();
        if refund_due > 0 {
            tx::Entity::update_many()
                .col_expr(tx::Column::RefundDue, Expr::value(refund_due))
                .filter(tx::Column::Id.eq(transaction.id))
                .exec(txn)
                .await?;
        }

        let organizer_credit = organizer_credit(transaction, refund_due);
        let event = ev::Entity::find_by_id(metadata.event_id)
            .one(txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", metadata.event_id)))?;
        self.balances
            .credit(txn, event.organizer_id, organizer_credit)
            .await?;

        Ok(Fulfilment {
            tickets,
            shortfalls,
            organizer_credit,
            event,
        })
    }

    /// Replayed confirmation: report what the first settlement did
    async fn already_settled(&self, transaction: tx::Model) -> AppResult<SettlementOutcome> {
        let tickets = tickets_of_transaction(&self.pool, transaction.id).await?;
        let shortfalls = match stored_metadata(&transaction) {
            Ok(metadata) => shortfalls_from_tickets(&metadata, &tickets),
            Err(_) => Vec::new(),
        };
        log::info!(
            "Settlement replay ignored: reference={}, tickets={}",
            transaction.payment_reference,
            tickets.len()
        );
        Ok(SettlementOutcome {
            status: SettlementStatus::AlreadySettled,
            refund_due: transaction.refund_due,
            organizer_credit: organizer_credit(&transaction, transaction.refund_due),
            shortfalls,
            tickets: tickets.into_iter().map(Into::into).collect(),
            transaction: transaction.into(),
        })
    }

    async fn fail(&self, transaction: &tx::Model, reason: &str) -> AppResult<SettlementOutcome> {
        let reference = &transaction.payment_reference;
        if !mark_failed(&self.pool, transaction.id, reason).await? {
            let current = find_by_reference(&self.pool, reference).await?;
            if current.status == TransactionStatus::Completed {
                return self.already_settled(current).await;
            }
        }
        Err(AppError::ExternalVerificationFailure {
            reference: reference.clone(),
            reason: reason.to_string(),
        })
    }

    /// Notification and asset rendering, both outside the money path
    async fn after_commit(
        &self,
        transaction: &tx::Model,
        metadata: &OrderMetadata,
        fulfilment: &Fulfilment,
    ) {
        match users::Entity::find_by_id(metadata.attendee_id)
            .one(&self.pool)
            .await
        {
            Ok(Some(attendee)) => {
                let numbers: Vec<&str> = fulfilment
                    .tickets
                    .iter()
                    .map(|t| t.ticket_number.as_str())
                    .collect();
                self.notifier.notify(Notification::new(
                    NotificationKind::TicketsIssued,
                    attendee.email,
                    json!({
                        "reference": transaction.payment_reference,
                        "event_title": fulfilment.event.title,
                        "ticket_count": numbers.len(),
                        "ticket_numbers": numbers.join(", "),
                        "refund_due": transaction.refund_due,
                    }),
                ));
            }
            Ok(None) => log::warn!("Attendee {} not found for notification", metadata.attendee_id),
            Err(e) => log::warn!("Could not load attendee for notification: {e}"),
        }

        if !self.assets.is_configured() || fulfilment.tickets.is_empty() {
            return;
        }
        let pool = self.pool.clone();
        let assets = self.assets.clone();
        let tickets = fulfilment.tickets.clone();
        tokio::spawn(async move {
            for ticket in tickets {
                if let Err(e) = render_and_store(&pool, assets.as_ref(), &ticket).await {
                    log::warn!(
                        "Ticket assets not rendered for {}, will retry later: {e}",
                        ticket.ticket_number
                    );
                }
            }
        });
    }

    /// Resolves pending purchases older than `ttl`: each gets one last
    /// verification, whatever is still unconfirmed is marked failed.
    /// Returns how many were failed.
    pub async fn expire_stale_pending(&self, ttl: chrono::Duration, limit: u64) -> AppResult<u64> {
        let cutoff = Utc::now() - ttl;
        let stale = tx::Entity::find()
            .filter(tx::Column::Status.eq(TransactionStatus::Pending))
            .filter(tx::Column::TransactionType.eq(TransactionType::Purchase))
            .filter(tx::Column::CreatedAt.lt(cutoff))
            .order_by_asc(tx::Column::CreatedAt)
            .limit(limit)
            .all(&self.pool)
            .await?;

        let mut expired = 0;
        for transaction in stale {
            let reference = &transaction.payment_reference;
            match self.settle(reference).await {
                Ok(outcome) => {
                    log::info!("Late settlement of {reference}: {:?}", outcome.status);
                }
                Err(AppError::ExternalVerificationFailure { .. }) => expired += 1,
                Err(e) => {
                    log::info!("Expiring {reference} after confirmation window: {e}");
                    match mark_failed(&self.pool, transaction.id, EXPIRED_REASON).await {
                        Ok(true) => expired += 1,
                        Ok(false) => {}
                        Err(e) => log::error!("Could not expire {reference}: {e}"),
                    }
                }
            }
        }
        Ok(expired)
    }
}

struct Fulfilment {
    tickets: Vec<tk::Model>,
    shortfalls: Vec<Shortfall>,
    organizer_credit: i64,
    event: ev::Model,
}

pub(crate) async fn find_by_reference<C: ConnectionTrait>(
    conn: &C,
    reference: &str,
) -> AppResult<tx::Model> {
    tx::Entity::find()
        .filter(tx::Column::PaymentReference.eq(reference))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {reference}")))
}

/// pending -> failed with a reason. Returns false when the transaction had
/// already left `pending`.
pub(crate) async fn mark_failed<C: ConnectionTrait>(
    conn: &C,
    transaction_id: i64,
    reason: &str,
) -> AppResult<bool> {
    let res = tx::Entity::update_many()
        .col_expr(tx::Column::Status, Expr::value(TransactionStatus::Failed))
        .col_expr(tx::Column::FailureReason, Expr::value(Some(reason.to_string())))
        .col_expr(tx::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(tx::Column::Id.eq(transaction_id))
        .filter(tx::Column::Status.eq(TransactionStatus::Pending))
        .exec(conn)
        .await?;
    if res.rows_affected == 1 {
        log::info!("Transaction {transaction_id}: pending -> failed ({reason})");
        Ok(true)
    } else {
        Ok(false)
    }
}

fn stored_metadata(transaction: &tx::Model) -> AppResult<OrderMetadata> {
    let value = transaction.payment_metadata.as_ref().ok_or_else(|| {
        AppError::InternalError(format!(
            "transaction {} has no order metadata",
            transaction.payment_reference
        ))
    })?;
    OrderMetadata::from_value(value)
}

/// Guarded `sold += n` for one order line. Grants as many units as the live
/// counters allow and retries when another settlement moved them first.
async fn grant_units(
    txn: &DatabaseTransaction,
    line: &OrderLine,
    ordered_at: DateTime<Utc>,
) -> AppResult<i32> {
    for _ in 0..MAX_GRANT_ATTEMPTS {
        let Some(ticket_type) = tt::Entity::find_by_id(line.ticket_type_id).one(txn).await?
        else {
            return Ok(0);
        };
        let grant = inventory_guard::grantable(&ticket_type, line.quantity, ordered_at);
        if grant == 0 {
            return Ok(0);
        }

        if take_units(txn, ticket_type.id, grant).await? {
            return Ok(grant);
        }
    }
    Err(AppError::Conflict(format!(
        "ticket type {} is under heavy contention, retry settlement",
        line.ticket_type_id
    )))
}

/// `sold += grant` only while the live row still has room for `grant`.
/// Returns false when the counters moved since they were read.
async fn take_units<C: ConnectionTrait>(conn: &C, ticket_type_id: i64, grant: i32) -> AppResult<bool> {
    let res = tt::Entity::update_many()
        .col_expr(tt::Column::Sold, Expr::col(tt::Column::Sold).add(grant))
        .col_expr(tt::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(tt::Column::Id.eq(ticket_type_id))
        .filter(Expr::col(tt::Column::Sold).lte(Expr::col(tt::Column::Quantity).sub(grant)))
        .exec(conn)
        .await?;
    Ok(res.rows_affected == 1)
}

/// Net owed to the organizer for what was actually issued. The platform fee
/// of unissued units is given up at the rate charged on the order.
fn organizer_credit(transaction: &tx::Model, refund_due: i64) -> i64 {
    if refund_due <= 0 {
        return transaction.net_amount;
    }
    let issued_gross = (transaction.amount - refund_due).max(0);
    let fee = fee_calculator::prorate(transaction.platform_fee, issued_gross, transaction.amount);
    issued_gross - fee
}

fn shortfalls_from_tickets(metadata: &OrderMetadata, tickets: &[tk::Model]) -> Vec<Shortfall> {
    let mut issued: HashMap<i64, i32> = HashMap::new();
    for ticket in tickets {
        *issued.entry(ticket.ticket_type_id).or_default() += 1;
    }
    metadata
        .items
        .iter()
        .filter_map(|line| {
            let count = issued.get(&line.ticket_type_id).copied().unwrap_or(0);
            (count < line.quantity).then(|| Shortfall {
                ticket_type_id: line.ticket_type_id,
                requested: line.quantity,
                issued: count,
                unit_price: line.unit_price,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{UserRole, organizer_balance_entity as ob};
    use crate::external::{NotificationKind, RetryPolicy};
    use crate::models::{CreateOrderRequest, CreateOrderResponse, OrderItemRequest};
    use crate::services::OrderService;
    use crate::test_support::*;
    use sea_orm::PaginatorTrait;
    use std::sync::atomic::Ordering;

    struct Fixture {
        db: DatabaseConnection,
        gateway: Arc<ScriptedGateway>,
        sink: Arc<RecordingSink>,
        assets: Arc<SwitchableAssets>,
        orders: OrderService,
        service: SettlementService,
        organizer: i64,
        attendee: i64,
        event: i64,
    }

    async fn fixture_with_timeout(verify_timeout: Duration) -> Fixture {
        let db = setup_db().await;
        let organizer = seed_user(&db, UserRole::Organizer, "org@example.com").await;
        let attendee = seed_user(&db, UserRole::Attendee, "ada@example.com").await;
        let event = seed_event(&db, organizer.id).await;
        let gateway = Arc::new(ScriptedGateway::default());
        let sink = Arc::new(RecordingSink::default());
        let assets = Arc::new(SwitchableAssets::default());
        let orders = OrderService::new(db.clone(), gateway.clone(), fixed_settings());
        let service = SettlementService::new(
            db.clone(),
            gateway.clone(),
            BalanceService::new(db.clone()),
            NotificationDispatcher::spawn(sink.clone(), RetryPolicy::default()),
            assets.clone(),
            verify_timeout,
        );
        Fixture {
            db,
            gateway,
            sink,
            assets,
            orders,
            service,
            organizer: organizer.id,
            attendee: attendee.id,
            event: event.id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_timeout(Duration::from_secs(5)).await
    }

    impl Fixture {
        async fn order(&self, items: &[(i64, i32)]) -> CreateOrderResponse {
            self.orders
                .create_order(
                    self.attendee,
                    CreateOrderRequest {
                        event_id: self.event,
                        items: items
                            .iter()
                            .map(|&(ticket_type_id, quantity)| OrderItemRequest {
                                ticket_type_id,
                                quantity,
                            })
                            .collect(),
                    },
                )
                .await
                .unwrap()
        }

        async fn transaction(&self, reference: &str) -> tx::Model {
            find_by_reference(&self.db, reference).await.unwrap()
        }

        async fn balance(&self) -> Option<ob::Model> {
            ob::Entity::find()
                .filter(ob::Column::OrganizerId.eq(self.organizer))
                .one(&self.db)
                .await
                .unwrap()
        }

        async fn sold(&self, ticket_type_id: i64) -> i32 {
            tt::Entity::find_by_id(ticket_type_id)
                .one(&self.db)
                .await
                .unwrap()
                .unwrap()
                .sold
        }

        async fn ticket_count(&self) -> u64 {
            tk::Entity::find().count(&self.db).await.unwrap()
        }
    }

    #[tokio::test]
    async fn settlement_issues_tickets_and_credits_organizer() {
        let f = fixture().await;
        let regular = seed_ticket_type(&f.db, f.event, 1500, 100).await;
        let vip = seed_ticket_type(&f.db, f.event, 2000, 10).await;
        let order = f.order(&[(regular.id, 2), (vip.id, 1)]).await;

        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);
        assert!(!outcome.has_shortfall());
        assert_eq!(outcome.tickets.len(), 3);
        assert_eq!(outcome.organizer_credit, 4750);
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert!(outcome.transaction.paid_at.is_some());
        assert!(
            outcome
                .tickets
                .iter()
                .all(|t| t.status == TicketStatus::Confirmed && t.attendee_id == f.attendee)
        );
        let prices: Vec<i64> = outcome.tickets.iter().map(|t| t.price).collect();
        assert_eq!(prices.iter().filter(|&&p| p == 1500).count(), 2);
        assert_eq!(prices.iter().filter(|&&p| p == 2000).count(), 1);

        assert_eq!(f.sold(regular.id).await, 2);
        assert_eq!(f.sold(vip.id).await, 1);

        let balance = f.balance().await.unwrap();
        assert_eq!(balance.total_earned, 4750);
        assert_eq!(balance.available_balance, 4750);
        assert!(balance.is_conserved());
    }

    #[tokio::test]
    async fn ticket_price_is_the_ordered_price() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;

        // organizer reprices between order and payment
        tt::Entity::update_many()
            .col_expr(tt::Column::Price, Expr::value(9999i64))
            .filter(tt::Column::Id.eq(t.id))
            .exec(&f.db)
            .await
            .unwrap();

        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.tickets[0].price, 1000);
    }

    #[tokio::test]
    async fn repeated_settlement_changes_nothing() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 5000, 10).await;
        let order = f.order(&[(t.id, 2)]).await;

        let first = f.service.settle(&order.reference).await.unwrap();
        let second = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(second.status, SettlementStatus::AlreadySettled);
        assert_eq!(first.tickets, second.tickets);
        assert_eq!(first.organizer_credit, second.organizer_credit);

        assert_eq!(f.ticket_count().await, 2);
        assert_eq!(f.sold(t.id).await, 2);
        assert_eq!(f.balance().await.unwrap().total_earned, 9500);
        // the replay did not go back to the gateway
        assert_eq!(f.gateway.verify_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_settlements_of_one_reference_issue_once() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 3)]).await;

        let (a, b, c) = tokio::join!(
            f.service.settle(&order.reference),
            f.service.settle(&order.reference),
            f.service.settle(&order.reference),
        );
        let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];
        let settled = outcomes
            .iter()
            .filter(|o| o.status == SettlementStatus::Settled)
            .count();
        assert_eq!(settled, 1);
        assert!(outcomes.iter().all(|o| o.tickets.len() == 3));

        assert_eq!(f.ticket_count().await, 3);
        assert_eq!(f.sold(t.id).await, 3);
        assert_eq!(f.balance().await.unwrap().total_earned, 2850);
    }

    #[tokio::test]
    async fn last_ticket_goes_to_one_order_and_the_other_is_refunded() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 1).await;
        let first = f.order(&[(t.id, 1)]).await;
        let second = f.order(&[(t.id, 1)]).await;

        let (a, b) = tokio::join!(
            f.service.settle(&first.reference),
            f.service.settle(&second.reference),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.tickets.len() + b.tickets.len(), 1);
        assert_eq!(f.sold(t.id).await, 1);

        let loser = if a.tickets.is_empty() { &a } else { &b };
        assert_eq!(
            loser.shortfalls,
            vec![Shortfall {
                ticket_type_id: t.id,
                requested: 1,
                issued: 0,
                unit_price: 1000,
            }]
        );
        assert_eq!(loser.refund_due, 1000);
        assert_eq!(loser.organizer_credit, 0);
        assert_eq!(loser.transaction.status, TransactionStatus::Completed);
        let stored = f.transaction(&loser.transaction.payment_reference).await;
        assert_eq!(stored.refund_due, 1000);

        // only the fulfilled order reaches the ledger
        assert_eq!(f.balance().await.unwrap().total_earned, 950);
    }

    #[tokio::test]
    async fn partial_fulfilment_prorates_the_credit() {
        let f = fixture().await;
        let scarce = seed_ticket_type(&f.db, f.event, 2000, 2).await;
        let order = f.order(&[(scarce.id, 2)]).await;
        assert_eq!(order.platform_fee, 200);

        // another channel sells one unit before payment lands
        tt::Entity::update_many()
            .col_expr(tt::Column::Sold, Expr::value(1))
            .filter(tt::Column::Id.eq(scarce.id))
            .exec(&f.db)
            .await
            .unwrap();

        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.tickets.len(), 1);
        assert_eq!(outcome.shortfalls[0].missing(), 1);
        assert_eq!(outcome.refund_due, 2000);
        // half the gross issued, half the fee kept
        assert_eq!(outcome.organizer_credit, 1900);

        let replay = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(replay.shortfalls, outcome.shortfalls);
        assert_eq!(replay.refund_due, 2000);
    }

    #[tokio::test]
    async fn declined_payment_fails_the_transaction() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;
        f.gateway
            .script(&order.reference, Scripted::Decline("Insufficient Funds".into()));

        let err = f.service.settle(&order.reference).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalVerificationFailure { .. }));
        let stored = f.transaction(&order.reference).await;
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("Insufficient Funds"));

        // terminal: a later confirmation attempt is refused
        assert!(matches!(
            f.service.settle(&order.reference).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(f.ticket_count().await, 0);
        assert!(f.balance().await.is_none());
    }

    #[tokio::test]
    async fn amount_mismatch_is_a_failed_verification() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 2)]).await;
        f.gateway.script(&order.reference, Scripted::Amount(1000));

        let err = f.service.settle(&order.reference).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalVerificationFailure { .. }));
        let stored = f.transaction(&order.reference).await;
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert!(stored.failure_reason.unwrap().contains("amount mismatch"));
        assert_eq!(f.sold(t.id).await, 0);
    }

    #[tokio::test]
    async fn gateway_trouble_leaves_the_transaction_pending() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;

        f.gateway.script(&order.reference, Scripted::TransportError);
        assert!(matches!(
            f.service.settle(&order.reference).await,
            Err(AppError::ExternalApiError(_))
        ));
        f.gateway.script(&order.reference, Scripted::Unpaid);
        assert!(matches!(
            f.service.settle(&order.reference).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(
            f.transaction(&order.reference).await.status,
            TransactionStatus::Pending
        );

        // a later retry succeeds
        f.gateway.script(&order.reference, Scripted::NoEcho);
        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);
        assert_eq!(outcome.tickets.len(), 1);
    }

    #[tokio::test]
    async fn currency_mismatch_is_a_failed_verification() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;
        f.gateway
            .script(&order.reference, Scripted::Currency("USD".into()));

        let err = f.service.settle(&order.reference).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalVerificationFailure { .. }));
        let stored = f.transaction(&order.reference).await;
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert!(stored.failure_reason.unwrap().contains("USD"));
        assert_eq!(f.ticket_count().await, 0);
    }

    #[tokio::test]
    async fn rate_limited_verification_leaves_the_transaction_pending() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;

        let base_url = serve_canned(
            "429 Too Many Requests",
            r#"{"status":false,"message":"Too many requests"}"#,
        )
        .await;
        let throttled = SettlementService::new(
            f.db.clone(),
            Arc::new(paystack_at(&base_url)),
            BalanceService::new(f.db.clone()),
            NotificationDispatcher::spawn(f.sink.clone(), RetryPolicy::default()),
            f.assets.clone(),
            Duration::from_secs(5),
        );

        assert!(matches!(
            throttled.settle(&order.reference).await,
            Err(AppError::ExternalApiError(_))
        ));
        let stored = f.transaction(&order.reference).await;
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert!(stored.failure_reason.is_none());

        // the provider answers again and the paid order goes through
        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);
    }

    #[tokio::test]
    async fn verification_timeout_leaves_the_transaction_pending() {
        let f = fixture_with_timeout(Duration::from_millis(50)).await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;
        f.gateway.script(&order.reference, Scripted::Hang);

        assert!(matches!(
            f.service.settle(&order.reference).await,
            Err(AppError::ExternalApiError(_))
        ));
        assert_eq!(
            f.transaction(&order.reference).await.status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.service.settle("TXN-nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn attendee_is_notified_and_assets_rendered() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 2)]).await;
        let outcome = f.service.settle(&order.reference).await.unwrap();

        let sink = f.sink.clone();
        assert!(eventually(|| !sink.snapshot().is_empty()).await);
        let sent = f.sink.snapshot();
        assert_eq!(sent[0].kind, NotificationKind::TicketsIssued);
        assert_eq!(sent[0].recipient, "ada@example.com");
        assert_eq!(sent[0].payload["ticket_count"], 2);

        let assets = f.assets.clone();
        assert!(eventually(|| assets.rendered.lock().unwrap().len() == 2).await);
        let first = outcome.tickets[0].id;
        let db = f.db.clone();
        let mut stored = None;
        for _ in 0..50 {
            let ticket = tk::Entity::find_by_id(first).one(&db).await.unwrap().unwrap();
            if ticket.qr_code_url.is_some() {
                stored = Some(ticket);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn asset_failure_does_not_affect_tickets() {
        let f = fixture().await;
        f.assets.failing.store(true, Ordering::SeqCst);
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let order = f.order(&[(t.id, 1)]).await;

        let outcome = f.service.settle(&order.reference).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ticket = tk::Entity::find_by_id(outcome.tickets[0].id)
            .one(&f.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Confirmed);
        assert!(ticket.qr_code_url.is_none());
    }

    #[tokio::test]
    async fn stale_pending_orders_are_resolved_or_expired() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let abandoned = f.order(&[(t.id, 1)]).await;
        let paid_late = f.order(&[(t.id, 1)]).await;
        let settled = f.order(&[(t.id, 1)]).await;
        f.service.settle(&settled.reference).await.unwrap();
        f.gateway.script(&abandoned.reference, Scripted::Unpaid);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = f
            .service
            .expire_stale_pending(chrono::Duration::zero(), 100)
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let stored = f.transaction(&abandoned.reference).await;
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some(EXPIRED_REASON));
        assert_eq!(
            f.transaction(&paid_late.reference).await.status,
            TransactionStatus::Completed
        );
        assert_eq!(f.sold(t.id).await, 2);
    }

    #[tokio::test]
    async fn expiry_sweep_continues_past_a_failed_write() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 10).await;
        let stuck = f.order(&[(t.id, 1)]).await;
        let abandoned = f.order(&[(t.id, 1)]).await;
        f.gateway.script(&stuck.reference, Scripted::Unpaid);
        f.gateway.script(&abandoned.reference, Scripted::Unpaid);
        f.db.execute_unprepared(&format!(
            "CREATE TRIGGER refuse_expiry BEFORE UPDATE ON transactions \
             WHEN NEW.payment_reference = '{}' AND NEW.status = 'failed' \
             BEGIN SELECT RAISE(ABORT, 'row locked'); END;",
            stuck.reference
        ))
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = f
            .service
            .expire_stale_pending(chrono::Duration::zero(), 100)
            .await
            .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(
            f.transaction(&stuck.reference).await.status,
            TransactionStatus::Pending
        );
        assert_eq!(
            f.transaction(&abandoned.reference).await.status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn sold_guard_refuses_a_grant_based_on_a_stale_read() {
        let f = fixture().await;
        let t = seed_ticket_type(&f.db, f.event, 1000, 2).await;
        let seen = tt::Entity::find_by_id(t.id).one(&f.db).await.unwrap().unwrap();
        let grant = inventory_guard::grantable(&seen, 2, Utc::now());
        assert_eq!(grant, 2);

        // another settlement takes a unit after the read
        tt::Entity::update_many()
            .col_expr(tt::Column::Sold, Expr::value(1))
            .filter(tt::Column::Id.eq(t.id))
            .exec(&f.db)
            .await
            .unwrap();

        assert!(!take_units(&f.db, t.id, grant).await.unwrap());
        assert_eq!(f.sold(t.id).await, 1);
        assert!(take_units(&f.db, t.id, 1).await.unwrap());
        assert_eq!(f.sold(t.id).await, 2);
        assert!(!take_units(&f.db, t.id, 1).await.unwrap());
        assert_eq!(f.sold(t.id).await, 2);
    }

    #[test]
    fn credit_gives_up_fee_of_unissued_units() {
        let now = Utc::now();
        let model = tx::Model {
            id: 1,
            user_id: 1,
            event_id: Some(1),
            transaction_type: TransactionType::Purchase,
            status: TransactionStatus::Completed,
            amount: 3000,
            platform_fee: 150,
            net_amount: 2850,
            currency: "NGN".into(),
            payment_gateway: "scripted".into(),
            payment_reference: "TXN-x".into(),
            payment_metadata: None,
            authorization_url: None,
            refund_due: 0,
            failure_reason: None,
            paid_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(organizer_credit(&model, 0), 2850);
        assert_eq!(organizer_credit(&model, 1000), 1900);
        assert_eq!(organizer_credit(&model, 3000), 0);
    }
}
