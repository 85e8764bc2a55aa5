use crate::entities::{
    TicketStatus, TransactionStatus, TransactionType, UserRole, event_entity as ev,
    ticket_entity as tk, transaction_entity as tx, user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::external::TicketAssetPipeline;
use crate::models::{
    EventStatsResponse, PaginatedResponse, PaginationParams, PlatformStatsQuery,
    PlatformStatsResponse, TicketResponse, TransactionResponse,
};
use crate::services::{SettingsProvider, fee_calculator};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct TicketService {
    pool: DatabaseConnection,
    assets: Arc<dyn TicketAssetPipeline>,
    settings: Arc<dyn SettingsProvider>,
}

impl TicketService {
    pub fn new(
        pool: DatabaseConnection,
        assets: Arc<dyn TicketAssetPipeline>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            pool,
            assets,
            settings,
        }
    }

    pub async fn list_for_attendee(&self, attendee_id: i64) -> AppResult<Vec<TicketResponse>> {
        let list = tk::Entity::find()
            .filter(tk::Column::AttendeeId.eq(attendee_id))
            .order_by_desc(tk::Column::CreatedAt)
            .order_by_desc(tk::Column::Id)
            .all(&self.pool)
            .await?;
        Ok(list.into_iter().map(Into::into).collect())
    }

    /// Another attendee's ticket reads as not found
    pub async fn get_for_attendee(
        &self,
        attendee_id: i64,
        ticket_id: i64,
    ) -> AppResult<TicketResponse> {
        tk::Entity::find_by_id(ticket_id)
            .filter(tk::Column::AttendeeId.eq(attendee_id))
            .one(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_id}")))
    }

    pub async fn transaction_history(
        &self,
        user_id: i64,
        params: &PaginationParams,
    ) -> AppResult<PaginatedResponse<TransactionResponse>> {
        let base_query = tx::Entity::find().filter(tx::Column::UserId.eq(user_id));
        let total = base_query.clone().count(&self.pool).await?;

        let items = base_query
            .order_by_desc(tx::Column::CreatedAt)
            .order_by_desc(tx::Column::Id)
            .limit(params.page_size())
            .offset(params.offset())
            .all(&self.pool)
            .await?;

        Ok(PaginatedResponse::new(
            items.into_iter().map(Into::into).collect(),
            params,
            total,
        ))
    }

    pub async fn event_stats(
        &self,
        organizer_id: i64,
        event_id: i64,
    ) -> AppResult<EventStatsResponse> {
        let event = ev::Entity::find_by_id(event_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {event_id}")))?;
        if event.organizer_id != organizer_id {
            return Err(AppError::Forbidden);
        }

        let sold = tk::Entity::find()
            .filter(tk::Column::EventId.eq(event_id))
            .filter(tk::Column::Status.is_in([TicketStatus::Confirmed, TicketStatus::Used]))
            .all(&self.pool)
            .await?;

        let tickets_checked_in = sold
            .iter()
            .filter(|t| t.status == TicketStatus::Used || t.checked_in_at.is_some())
            .count() as u64;
        let gross_revenue: i64 = sold.iter().map(|t| t.price).sum();
        let settings = self.settings.current().await?;
        let fees = fee_calculator::split(gross_revenue, settings.platform_fee_bp);

        Ok(EventStatsResponse {
            event_id,
            tickets_sold: sold.len() as u64,
            tickets_checked_in,
            gross_revenue,
            platform_fees: fees.fee,
            net_revenue: fees.net,
            currency: settings.currency,
        })
    }

    /// Platform-wide sales over a reporting window. Revenue comes from
    /// completed purchases only; the platform's share of an order with a
    /// shortfall is the fee prorated to what was issued.
    pub async fn platform_stats(&self, query: PlatformStatsQuery) -> AppResult<PlatformStatsResponse> {
        let (start, end) = stats_window(&query, Utc::now())?;

        let total_users = users::Entity::find()
            .filter(users::Column::CreatedAt.gte(start))
            .filter(users::Column::CreatedAt.lt(end))
            .count(&self.pool)
            .await?;
        let total_organizers = users::Entity::find()
            .filter(users::Column::Role.eq(UserRole::Organizer))
            .count(&self.pool)
            .await?;
        let total_events = ev::Entity::find()
            .filter(ev::Column::IsPublished.eq(true))
            .filter(ev::Column::CreatedAt.gte(start))
            .filter(ev::Column::CreatedAt.lt(end))
            .count(&self.pool)
            .await?;
        let total_tickets_sold = tk::Entity::find()
            .filter(tk::Column::Status.is_in([TicketStatus::Confirmed, TicketStatus::Used]))
            .filter(tk::Column::CreatedAt.gte(start))
            .filter(tk::Column::CreatedAt.lt(end))
            .count(&self.pool)
            .await?;

        let purchases = tx::Entity::find()
            .filter(tx::Column::TransactionType.eq(TransactionType::Purchase))
            .filter(tx::Column::Status.eq(TransactionStatus::Completed))
            .filter(tx::Column::CreatedAt.gte(start))
            .filter(tx::Column::CreatedAt.lt(end))
            .all(&self.pool)
            .await?;
        let mut total_revenue = 0;
        let mut platform_revenue = 0;
        let mut refunds_due = 0;
        for purchase in &purchases {
            total_revenue += purchase.amount;
            refunds_due += purchase.refund_due;
            platform_revenue += fee_calculator::prorate(
                purchase.platform_fee,
                purchase.amount - purchase.refund_due,
                purchase.amount,
            );
        }

        let settings = self.settings.current().await?;
        Ok(PlatformStatsResponse {
            start,
            end,
            total_users,
            total_organizers,
            total_events,
            total_tickets_sold,
            total_revenue,
            platform_revenue,
            refunds_due,
            currency: settings.currency,
        })
    }

    /// Retries asset rendering for confirmed tickets that still have none.
    /// Returns how many tickets got their assets.
    pub async fn backfill_assets(&self, limit: u64) -> AppResult<usize> {
        if !self.assets.is_configured() {
            return Ok(0);
        }
        let missing = tk::Entity::find()
            .filter(tk::Column::Status.eq(TicketStatus::Confirmed))
            .filter(
                Condition::any()
                    .add(tk::Column::QrCodeUrl.is_null())
                    .add(tk::Column::PdfUrl.is_null()),
            )
            .order_by_asc(tk::Column::Id)
            .limit(limit)
            .all(&self.pool)
            .await?;

        let mut rendered = 0;
        for ticket in missing {
            match render_and_store(&self.pool, self.assets.as_ref(), &ticket).await {
                Ok(()) => rendered += 1,
                Err(e) => log::warn!(
                    "Asset backfill failed for ticket {}: {e}",
                    ticket.ticket_number
                ),
            }
        }
        Ok(rendered)
    }
}

/// Half-open `[start, end)` window. A missing start is 30 days before
/// `now`, a missing end is `now`; an end date includes that whole day.
fn stats_window(
    query: &PlatformStatsQuery,
    now: DateTime<Utc>,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start = match query.start {
        Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
        None => now - Duration::days(30),
    };
    let end = match query.end {
        Some(date) => date
            .succ_opt()
            .ok_or_else(|| AppError::ValidationError(format!("end date {date} is out of range")))?
            .and_time(NaiveTime::MIN)
            .and_utc(),
        None => now,
    };
    if start >= end {
        return Err(AppError::ValidationError(
            "start must be before end".to_string(),
        ));
    }
    Ok((start, end))
}

pub(crate) async fn tickets_of_transaction<C: ConnectionTrait>(
    conn: &C,
    transaction_id: i64,
) -> AppResult<Vec<tk::Model>> {
    Ok(tk::Entity::find()
        .filter(tk::Column::TransactionId.eq(transaction_id))
        .order_by_asc(tk::Column::Id)
        .all(conn)
        .await?)
}

/// Renders one ticket's QR/PDF and stores the URLs. The ticket's status is
/// never touched, a failure just leaves the URLs empty.
pub(crate) async fn render_and_store(
    pool: &DatabaseConnection,
    assets: &dyn TicketAssetPipeline,
    ticket: &tk::Model,
) -> AppResult<()> {
    let rendered = assets.render(ticket).await?;
    tk::Entity::update_many()
        .col_expr(tk::Column::QrCodeUrl, Expr::value(rendered.qr_code_url))
        .col_expr(tk::Column::PdfUrl, Expr::value(rendered.pdf_url))
        .col_expr(tk::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(tk::Column::Id.eq(ticket.id))
        .exec(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{TransactionStatus, TransactionType, UserRole};
    use crate::test_support::*;
    use sea_orm::{ActiveModelTrait, Set};
    use std::sync::atomic::Ordering;

    async fn insert_transaction(db: &DatabaseConnection, user_id: i64, reference: &str) -> tx::Model {
        let now = Utc::now();
        tx::ActiveModel {
            user_id: Set(user_id),
            event_id: Set(None),
            transaction_type: Set(TransactionType::Purchase),
            status: Set(TransactionStatus::Completed),
            amount: Set(1000),
            platform_fee: Set(50),
            net_amount: Set(950),
            currency: Set("NGN".into()),
            payment_gateway: Set("scripted".into()),
            payment_reference: Set(reference.into()),
            payment_metadata: Set(None),
            authorization_url: Set(None),
            refund_due: Set(0),
            failure_reason: Set(None),
            paid_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    async fn insert_ticket(
        db: &DatabaseConnection,
        transaction: &tx::Model,
        event_id: i64,
        ticket_type_id: i64,
        number: &str,
        status: TicketStatus,
    ) -> tk::Model {
        let now = Utc::now();
        tk::ActiveModel {
            ticket_number: Set(number.into()),
            transaction_id: Set(transaction.id),
            event_id: Set(event_id),
            ticket_type_id: Set(ticket_type_id),
            attendee_id: Set(transaction.user_id),
            status: Set(status),
            price: Set(1000),
            qr_code_url: Set(None),
            pdf_url: Set(None),
            checked_in_at: Set(None),
            checked_in_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    struct Fixture {
        db: DatabaseConnection,
        assets: Arc<SwitchableAssets>,
        service: TicketService,
        organizer: i64,
        attendee: i64,
        event: i64,
        ticket_type: i64,
    }

    async fn fixture() -> Fixture {
        let db = setup_db().await;
        let organizer = seed_user(&db, UserRole::Organizer, "org@example.com").await;
        let attendee = seed_user(&db, UserRole::Attendee, "ada@example.com").await;
        let event = seed_event(&db, organizer.id).await;
        let ticket_type = seed_ticket_type(&db, event.id, 1000, 50).await;
        let assets = Arc::new(SwitchableAssets::default());
        let service = TicketService::new(db.clone(), assets.clone(), fixed_settings());
        Fixture {
            db,
            assets,
            service,
            organizer: organizer.id,
            attendee: attendee.id,
            event: event.id,
            ticket_type: ticket_type.id,
        }
    }

    #[tokio::test]
    async fn tickets_are_scoped_to_their_owner() {
        let f = fixture().await;
        let other = seed_user(&f.db, UserRole::Attendee, "bob@example.com").await;
        let mine = insert_transaction(&f.db, f.attendee, "TXN-a").await;
        let theirs = insert_transaction(&f.db, other.id, "TXN-b").await;
        let t1 = insert_ticket(&f.db, &mine, f.event, f.ticket_type, "TKT-A", TicketStatus::Confirmed).await;
        let t2 = insert_ticket(&f.db, &theirs, f.event, f.ticket_type, "TKT-B", TicketStatus::Confirmed).await;

        let list = f.service.list_for_attendee(f.attendee).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ticket_number, "TKT-A");

        assert!(f.service.get_for_attendee(f.attendee, t1.id).await.is_ok());
        assert!(matches!(
            f.service.get_for_attendee(f.attendee, t2.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_is_paginated_newest_first() {
        let f = fixture().await;
        for i in 0..5 {
            insert_transaction(&f.db, f.attendee, &format!("TXN-{i}")).await;
        }
        let page = f
            .service
            .transaction_history(f.attendee, &PaginationParams::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].payment_reference, "TXN-4");
    }

    #[tokio::test]
    async fn stats_count_sold_and_checked_in_tickets() {
        let f = fixture().await;
        let t = insert_transaction(&f.db, f.attendee, "TXN-s").await;
        insert_ticket(&f.db, &t, f.event, f.ticket_type, "TKT-1", TicketStatus::Confirmed).await;
        insert_ticket(&f.db, &t, f.event, f.ticket_type, "TKT-2", TicketStatus::Used).await;
        insert_ticket(&f.db, &t, f.event, f.ticket_type, "TKT-3", TicketStatus::Cancelled).await;

        let stats = f.service.event_stats(f.organizer, f.event).await.unwrap();
        assert_eq!(stats.tickets_sold, 2);
        assert_eq!(stats.tickets_checked_in, 1);
        assert_eq!(stats.gross_revenue, 2000);
        assert_eq!(stats.platform_fees, 100);
        assert_eq!(stats.net_revenue, 1900);

        assert!(matches!(
            f.service.event_stats(f.attendee, f.event).await,
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn backfill_fills_missing_assets_once_pipeline_recovers() {
        let f = fixture().await;
        let t = insert_transaction(&f.db, f.attendee, "TXN-q").await;
        let ticket = insert_ticket(&f.db, &t, f.event, f.ticket_type, "TKT-Q", TicketStatus::Confirmed).await;

        f.assets.failing.store(true, Ordering::SeqCst);
        assert_eq!(f.service.backfill_assets(10).await.unwrap(), 0);
        let stored = tk::Entity::find_by_id(ticket.id).one(&f.db).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Confirmed);
        assert!(stored.qr_code_url.is_none());

        f.assets.failing.store(false, Ordering::SeqCst);
        assert_eq!(f.service.backfill_assets(10).await.unwrap(), 1);
        let stored = tk::Entity::find_by_id(ticket.id).one(&f.db).await.unwrap().unwrap();
        assert_eq!(
            stored.qr_code_url.as_deref(),
            Some("https://cdn.test/qr/TKT-Q.png")
        );
        assert_eq!(
            f.assets.rendered.lock().unwrap().as_slice(),
            &[format!("TICKET:TKT-Q:ID:{}", ticket.id)]
        );

        // nothing left to do
        assert_eq!(f.service.backfill_assets(10).await.unwrap(), 0);
    }

    async fn adjust(db: &DatabaseConnection, id: i64, col: tx::Column, value: sea_orm::Value) {
        tx::Entity::update_many()
            .col_expr(col, Expr::value(value))
            .filter(tx::Column::Id.eq(id))
            .exec(db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn platform_stats_cover_completed_purchases_in_window() {
        let f = fixture().await;
        let plain = insert_transaction(&f.db, f.attendee, "TXN-p1").await;
        insert_ticket(&f.db, &plain, f.event, f.ticket_type, "TKT-1", TicketStatus::Confirmed).await;
        insert_ticket(&f.db, &plain, f.event, f.ticket_type, "TKT-2", TicketStatus::Used).await;
        insert_ticket(&f.db, &plain, f.event, f.ticket_type, "TKT-3", TicketStatus::Cancelled).await;

        // half of this order could not be issued
        let short = insert_transaction(&f.db, f.attendee, "TXN-p2").await;
        adjust(&f.db, short.id, tx::Column::Amount, 2000i64.into()).await;
        adjust(&f.db, short.id, tx::Column::PlatformFee, 100i64.into()).await;
        adjust(&f.db, short.id, tx::Column::RefundDue, 1000i64.into()).await;

        let unpaid = insert_transaction(&f.db, f.attendee, "TXN-p3").await;
        adjust(&f.db, unpaid.id, tx::Column::Status, TransactionStatus::Pending.into()).await;
        let payout = insert_transaction(&f.db, f.organizer, "WDR-p4").await;
        adjust(&f.db, payout.id, tx::Column::TransactionType, TransactionType::Withdrawal.into()).await;
        let old = insert_transaction(&f.db, f.attendee, "TXN-p5").await;
        let long_ago = Utc::now() - Duration::days(60);
        adjust(&f.db, old.id, tx::Column::CreatedAt, long_ago.into()).await;

        let stats = f
            .service
            .platform_stats(PlatformStatsQuery::default())
            .await
            .unwrap();
        assert_eq!(stats.total_revenue, 3000);
        assert_eq!(stats.platform_revenue, 100);
        assert_eq!(stats.refunds_due, 1000);
        assert_eq!(stats.total_tickets_sold, 2);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_organizers, 1);
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.currency, "NGN");

        let window = PlatformStatsQuery {
            start: Some((long_ago - Duration::days(1)).date_naive()),
            end: Some((long_ago + Duration::days(1)).date_naive()),
        };
        let stats = f.service.platform_stats(window).await.unwrap();
        assert_eq!(stats.total_revenue, 1000);
        assert_eq!(stats.platform_revenue, 50);
        assert_eq!(stats.total_tickets_sold, 0);
        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.total_organizers, 1);
    }

    #[test]
    fn stats_window_includes_the_whole_end_day() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let query = PlatformStatsQuery {
            start: Some(date),
            end: Some(date),
        };
        let (start, end) = stats_window(&query, Utc::now()).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert_eq!(end - start, Duration::days(1));

        let backwards = PlatformStatsQuery {
            start: Some(date),
            end: date.pred_opt(),
        };
        assert!(matches!(
            stats_window(&backwards, Utc::now()),
            Err(AppError::ValidationError(_))
        ));
    }
}
