use crate::entities::organizer_balance_entity as ob;
use crate::error::{AppError, AppResult};
use crate::models::BalanceResponse;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, UpdateResult,
};

/// Per-organizer ledger. Every mutation is one guarded UPDATE on the
/// organizer's row, so concurrent writers serialize on that row and a failed
/// guard changes nothing. Callers pass the connection so a mutation can join
/// their database transaction.
#[derive(Clone)]
pub struct BalanceService {
    pool: DatabaseConnection,
}

impl BalanceService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn get_balance(&self, organizer_id: i64) -> AppResult<BalanceResponse> {
        Ok(self.ensure_balance(&self.pool, organizer_id).await?.into())
    }

    /// Returns the organizer's row, creating an empty one on first use
    pub async fn ensure_balance<C: ConnectionTrait>(
        &self,
        conn: &C,
        organizer_id: i64,
    ) -> AppResult<ob::Model> {
        if let Some(row) = find_row(conn, organizer_id).await? {
            return Ok(row);
        }

        let now = Utc::now();
        // insert-if-absent, a concurrent creator wins silently
        let insert = Query::insert()
            .into_table(ob::Entity)
            .columns([
                ob::Column::OrganizerId,
                ob::Column::TotalEarned,
                ob::Column::AvailableBalance,
                ob::Column::PendingBalance,
                ob::Column::WithdrawnAmount,
                ob::Column::CreatedAt,
                ob::Column::UpdatedAt,
            ])
            .values_panic([
                organizer_id.into(),
                0i64.into(),
                0i64.into(),
                0i64.into(),
                0i64.into(),
                now.into(),
                now.into(),
            ])
            .on_conflict(
                OnConflict::column(ob::Column::OrganizerId)
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        let stmt = conn.get_database_backend().build(&insert);
        let res = conn.execute(stmt).await?;
        if res.rows_affected() > 0 {
            log::info!("Balance ledger opened for organizer {organizer_id}");
        }

        find_row(conn, organizer_id).await?.ok_or_else(|| {
            AppError::InternalError(format!("balance row for organizer {organizer_id} missing"))
        })
    }

    /// total_earned += amount, available += amount
    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        organizer_id: i64,
        amount: i64,
    ) -> AppResult<()> {
        if amount < 0 {
            return Err(AppError::ValidationError(format!(
                "credit amount cannot be negative: {amount}"
            )));
        }
        if amount == 0 {
            return Ok(());
        }
        self.ensure_balance(conn, organizer_id).await?;

        let res: UpdateResult = ob::Entity::update_many()
            .col_expr(
                ob::Column::TotalEarned,
                Expr::col(ob::Column::TotalEarned).add(amount),
            )
            .col_expr(
                ob::Column::AvailableBalance,
                Expr::col(ob::Column::AvailableBalance).add(amount),
            )
            .col_expr(ob::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ob::Column::OrganizerId.eq(organizer_id))
            .exec(conn)
            .await?;
        expect_one_row(res, "credit", organizer_id)?;

        log::info!("Ledger credit: organizer={organizer_id}, amount={amount}");
        Ok(())
    }

    /// available -= amount, pending += amount; fails if available < amount
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        organizer_id: i64,
        amount: i64,
    ) -> AppResult<()> {
        if amount <= 0 {
            return Err(AppError::ValidationError(format!(
                "reserve amount must be positive: {amount}"
            )));
        }
        self.ensure_balance(conn, organizer_id).await?;

        let res = ob::Entity::update_many()
            .col_expr(
                ob::Column::AvailableBalance,
                Expr::col(ob::Column::AvailableBalance).sub(amount),
            )
            .col_expr(
                ob::Column::PendingBalance,
                Expr::col(ob::Column::PendingBalance).add(amount),
            )
            .col_expr(ob::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ob::Column::OrganizerId.eq(organizer_id))
            .filter(ob::Column::AvailableBalance.gte(amount))
            .exec(conn)
            .await?;

        if res.rows_affected == 0 {
            let available = find_row(conn, organizer_id)
                .await?
                .map(|row| row.available_balance)
                .unwrap_or(0);
            return Err(AppError::InsufficientFunds {
                organizer_id,
                requested: amount,
                available,
            });
        }

        log::info!("Ledger reserve: organizer={organizer_id}, amount={amount}");
        Ok(())
    }

    /// pending -= amount, available += amount
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        organizer_id: i64,
        amount: i64,
    ) -> AppResult<()> {
        if amount <= 0 {
            return Err(AppError::ValidationError(format!(
                "release amount must be positive: {amount}"
            )));
        }

        let res = ob::Entity::update_many()
            .col_expr(
                ob::Column::PendingBalance,
                Expr::col(ob::Column::PendingBalance).sub(amount),
            )
            .col_expr(
                ob::Column::AvailableBalance,
                Expr::col(ob::Column::AvailableBalance).add(amount),
            )
            .col_expr(ob::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ob::Column::OrganizerId.eq(organizer_id))
            .filter(ob::Column::PendingBalance.gte(amount))
            .exec(conn)
            .await?;
        expect_one_row(res, "release", organizer_id)?;

        log::info!("Ledger release: organizer={organizer_id}, amount={amount}");
        Ok(())
    }

    /// pending -= reserved, withdrawn += paid. The difference is the
    /// withdrawal fee and leaves the organizer's books.
    pub async fn finalize<C: ConnectionTrait>(
        &self,
        conn: &C,
        organizer_id: i64,
        reserved: i64,
        paid: i64,
    ) -> AppResult<()> {
        if reserved <= 0 || paid < 0 || paid > reserved {
            return Err(AppError::ValidationError(format!(
                "invalid finalize amounts: reserved={reserved}, paid={paid}"
            )));
        }

        let res = ob::Entity::update_many()
            .col_expr(
                ob::Column::PendingBalance,
                Expr::col(ob::Column::PendingBalance).sub(reserved),
            )
            .col_expr(
                ob::Column::WithdrawnAmount,
                Expr::col(ob::Column::WithdrawnAmount).add(paid),
            )
            .col_expr(ob::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(ob::Column::OrganizerId.eq(organizer_id))
            .filter(ob::Column::PendingBalance.gte(reserved))
            .exec(conn)
            .await?;
        expect_one_row(res, "finalize", organizer_id)?;

        log::info!(
            "Ledger finalize: organizer={organizer_id}, reserved={reserved}, paid={paid}"
        );
        Ok(())
    }
}

async fn find_row<C: ConnectionTrait>(conn: &C, organizer_id: i64) -> AppResult<Option<ob::Model>> {
    Ok(ob::Entity::find()
        .filter(ob::Column::OrganizerId.eq(organizer_id))
        .one(conn)
        .await?)
}

fn expect_one_row(res: UpdateResult, op: &str, organizer_id: i64) -> AppResult<()> {
    if res.rows_affected == 1 {
        Ok(())
    } else {
        log::error!("Ledger {op} rejected for organizer {organizer_id}: guard not satisfied");
        Err(AppError::Conflict(format!(
            "ledger {op} for organizer {organizer_id} does not match its reserved balance"
        )))
    }
}
