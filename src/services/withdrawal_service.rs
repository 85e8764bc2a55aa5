use crate::entities::{
    TransactionStatus, TransactionType, WithdrawalStatus, transaction_entity as tx,
    user_entity as users, withdrawal_request_entity as wr,
};
use crate::error::{AppError, AppResult};
use crate::external::{Notification, NotificationDispatcher, NotificationKind};
use crate::models::{
    CreateWithdrawalRequest, PaginatedResponse, PaginationParams, ProcessWithdrawalRequest,
    ReviewAction, ReviewWithdrawalRequest, WithdrawalListQuery, WithdrawalResponse,
};
use crate::services::{BalanceService, SettingsProvider, fee_calculator};
use crate::utils::generate_withdrawal_reference;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;

/// Organizer payouts: pending -> approved | rejected, approved -> processed.
/// The requested amount is frozen into the ledger's pending balance when the
/// request is created and leaves it again on reject or process.
#[derive(Clone)]
pub struct WithdrawalService {
    pool: DatabaseConnection,
    settings: Arc<dyn SettingsProvider>,
    balances: BalanceService,
    notifier: NotificationDispatcher,
}

impl WithdrawalService {
    pub fn new(
        pool: DatabaseConnection,
        settings: Arc<dyn SettingsProvider>,
        balances: BalanceService,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            pool,
            settings,
            balances,
            notifier,
        }
    }

    pub async fn request_withdrawal(
        &self,
        organizer_id: i64,
        req: CreateWithdrawalRequest,
    ) -> AppResult<WithdrawalResponse> {
        let settings = self.settings.current().await?;
        if req.amount <= 0 || req.amount < settings.min_withdrawal_amount {
            return Err(AppError::ValidationError(format!(
                "minimum withdrawal amount is {}",
                settings.min_withdrawal_amount
            )));
        }
        for (field, value) in [
            ("bank_name", &req.bank_name),
            ("account_number", &req.account_number),
            ("account_name", &req.account_name),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::ValidationError(format!("{field} is required")));
            }
        }

        let fees = fee_calculator::split(req.amount, settings.withdrawal_fee_bp);
        let now = Utc::now();

        let txn = self.pool.begin().await?;
        // reserve first: an insufficient balance leaves no request behind
        self.balances.reserve(&txn, organizer_id, fees.gross).await?;
        let created = wr::ActiveModel {
            organizer_id: Set(organizer_id),
            amount: Set(fees.gross),
            fee: Set(fees.fee),
            net_amount: Set(fees.net),
            status: Set(WithdrawalStatus::Pending),
            bank_name: Set(req.bank_name.trim().to_string()),
            account_number: Set(req.account_number.trim().to_string()),
            account_name: Set(req.account_name.trim().to_string()),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_comment: Set(None),
            processed_at: Set(None),
            transaction_ref: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        log::info!(
            "Withdrawal {} requested: organizer={}, amount={}, fee={}, net={}",
            created.id,
            organizer_id,
            created.amount,
            created.fee,
            created.net_amount
        );
        self.notify_organizer(
            organizer_id,
            NotificationKind::WithdrawalRequested,
            json!({
                "withdrawal_id": created.id,
                "amount": created.amount,
                "fee": created.fee,
                "net_amount": created.net_amount,
            }),
        )
        .await;

        Ok(created.into())
    }

    pub async fn review(
        &self,
        withdrawal_id: i64,
        reviewer_id: i64,
        req: ReviewWithdrawalRequest,
    ) -> AppResult<WithdrawalResponse> {
        let next = match req.action {
            ReviewAction::Approve => WithdrawalStatus::Approved,
            ReviewAction::Reject => WithdrawalStatus::Rejected,
        };
        let comment = req
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let now = Utc::now();

        let txn = self.pool.begin().await?;
        let request = find_request(&txn, withdrawal_id).await?;
        if !request.status.can_transition_to(next) {
            txn.rollback().await?;
            return Err(illegal_transition(&request, next));
        }
        let res = wr::Entity::update_many()
            .col_expr(wr::Column::Status, Expr::value(next))
            .col_expr(wr::Column::ReviewedBy, Expr::value(Some(reviewer_id)))
            .col_expr(wr::Column::ReviewedAt, Expr::value(Some(now)))
            .col_expr(wr::Column::ReviewComment, Expr::value(comment.clone()))
            .col_expr(wr::Column::UpdatedAt, Expr::value(now))
            .filter(wr::Column::Id.eq(withdrawal_id))
            .filter(wr::Column::Status.eq(WithdrawalStatus::Pending))
            .exec(&txn)
            .await?;
        // someone else moved it since the read
        if res.rows_affected == 0 {
            txn.rollback().await?;
            return Err(illegal_transition(&request, next));
        }
        if next == WithdrawalStatus::Rejected {
            self.balances
                .release(&txn, request.organizer_id, request.amount)
                .await?;
        }
        let updated = find_request(&txn, withdrawal_id).await?;
        txn.commit().await?;

        log::info!(
            "Withdrawal {withdrawal_id}: pending -> {next} by reviewer {reviewer_id}"
        );
        self.notify_organizer(
            updated.organizer_id,
            NotificationKind::WithdrawalReviewed,
            json!({
                "withdrawal_id": updated.id,
                "status": next.to_string(),
                "comment": comment.unwrap_or_default(),
            }),
        )
        .await;

        Ok(updated.into())
    }

    /// Marks an approved request as paid out, settles the ledger and writes
    /// the withdrawal record to the transaction history.
    pub async fn process(
        &self,
        withdrawal_id: i64,
        req: ProcessWithdrawalRequest,
    ) -> AppResult<WithdrawalResponse> {
        let transaction_ref = req.transaction_ref.trim().to_string();
        if transaction_ref.is_empty() {
            return Err(AppError::ValidationError(
                "transaction_ref is required".to_string(),
            ));
        }
        let settings = self.settings.current().await?;
        let now = Utc::now();

        let txn = self.pool.begin().await?;
        let request = find_request(&txn, withdrawal_id).await?;
        if !request.status.can_transition_to(WithdrawalStatus::Processed) {
            txn.rollback().await?;
            return Err(illegal_transition(&request, WithdrawalStatus::Processed));
        }
        let res = wr::Entity::update_many()
            .col_expr(wr::Column::Status, Expr::value(WithdrawalStatus::Processed))
            .col_expr(wr::Column::ProcessedAt, Expr::value(Some(now)))
            .col_expr(
                wr::Column::TransactionRef,
                Expr::value(Some(transaction_ref.clone())),
            )
            .col_expr(wr::Column::UpdatedAt, Expr::value(now))
            .filter(wr::Column::Id.eq(withdrawal_id))
            .filter(wr::Column::Status.eq(WithdrawalStatus::Approved))
            .exec(&txn)
            .await?;
        // someone else moved it since the read
        if res.rows_affected == 0 {
            txn.rollback().await?;
            return Err(illegal_transition(&request, WithdrawalStatus::Processed));
        }

        self.balances
            .finalize(&txn, request.organizer_id, request.amount, request.net_amount)
            .await?;
        tx::ActiveModel {
            user_id: Set(request.organizer_id),
            event_id: Set(None),
            transaction_type: Set(TransactionType::Withdrawal),
            status: Set(TransactionStatus::Completed),
            amount: Set(request.amount),
            platform_fee: Set(request.fee),
            net_amount: Set(request.net_amount),
            currency: Set(settings.currency),
            payment_gateway: Set("bank_transfer".to_string()),
            payment_reference: Set(generate_withdrawal_reference(request.id)),
            payment_metadata: Set(Some(json!({
                "withdrawal_id": request.id,
                "transaction_ref": transaction_ref,
            }))),
            authorization_url: Set(None),
            refund_due: Set(0),
            failure_reason: Set(None),
            paid_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        let updated = find_request(&txn, withdrawal_id).await?;
        txn.commit().await?;

        log::info!(
            "Withdrawal {withdrawal_id}: approved -> processed, ref={transaction_ref}, paid={}",
            updated.net_amount
        );
        self.notify_organizer(
            updated.organizer_id,
            NotificationKind::WithdrawalProcessed,
            json!({
                "withdrawal_id": updated.id,
                "net_amount": updated.net_amount,
                "transaction_ref": transaction_ref,
            }),
        )
        .await;

        Ok(updated.into())
    }

    pub async fn list_for_organizer(
        &self,
        organizer_id: i64,
        params: &PaginationParams,
    ) -> AppResult<PaginatedResponse<WithdrawalResponse>> {
        let query = wr::Entity::find().filter(wr::Column::OrganizerId.eq(organizer_id));
        let total = query.clone().count(&self.pool).await?;
        let rows = query
            .order_by_desc(wr::Column::CreatedAt)
            .order_by_desc(wr::Column::Id)
            .offset(params.offset())
            .limit(params.page_size())
            .all(&self.pool)
            .await?;
        Ok(PaginatedResponse::new(
            rows.into_iter().map(Into::into).collect(),
            params,
            total,
        ))
    }

    /// Admin view, oldest first so the review queue reads in arrival order
    pub async fn list_all(
        &self,
        query: WithdrawalListQuery,
    ) -> AppResult<PaginatedResponse<WithdrawalResponse>> {
        let params = PaginationParams::new(query.page, query.page_size);
        let mut select = wr::Entity::find();
        if let Some(status) = query.status {
            select = select.filter(wr::Column::Status.eq(status));
        }
        let total = select.clone().count(&self.pool).await?;
        let rows = select
            .order_by_asc(wr::Column::CreatedAt)
            .order_by_asc(wr::Column::Id)
            .offset(params.offset())
            .limit(params.page_size())
            .all(&self.pool)
            .await?;
        Ok(PaginatedResponse::new(
            rows.into_iter().map(Into::into).collect(),
            &params,
            total,
        ))
    }

    async fn notify_organizer(
        &self,
        organizer_id: i64,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        match users::Entity::find_by_id(organizer_id).one(&self.pool).await {
            Ok(Some(organizer)) => self
                .notifier
                .notify(Notification::new(kind, organizer.email, payload)),
            Ok(None) => log::warn!("Organizer {organizer_id} not found, {kind:?} not sent"),
            Err(e) => log::warn!("Could not load organizer {organizer_id}: {e}"),
        }
    }
}

async fn find_request<C: ConnectionTrait>(conn: &C, withdrawal_id: i64) -> AppResult<wr::Model> {
    wr::Entity::find_by_id(withdrawal_id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("withdrawal request {withdrawal_id}")))
}

fn illegal_transition(request: &wr::Model, next: WithdrawalStatus) -> AppError {
    log::warn!(
        "Withdrawal {}: rejected transition {} -> {}",
        request.id,
        request.status,
        next
    );
    AppError::Conflict(format!(
        "withdrawal request {} is {} and cannot become {}",
        request.id, request.status, next
    ))
}
