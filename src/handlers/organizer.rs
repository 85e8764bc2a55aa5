use crate::entities::UserRole;
use crate::middlewares::require_role;
use crate::models::*;
use crate::services::{BalanceService, TicketService, WithdrawalService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

const ORGANIZER: &[UserRole] = &[UserRole::Organizer];

#[utoipa::path(
    get,
    path = "/organizer/balance",
    tag = "organizer",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Current ledger", body = BalanceResponse),
        (status = 403, description = "Not an organizer")
    )
)]
pub async fn get_balance(
    balance_service: web::Data<BalanceService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user = match require_role(&req, ORGANIZER) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match balance_service.get_balance(user.id).await {
        Ok(balance) => Ok(HttpResponse::Ok().json(ApiResponse::success(balance))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/organizer/withdrawals",
    tag = "organizer",
    request_body = CreateWithdrawalRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Withdrawal requested, amount frozen", body = WithdrawalResponse),
        (status = 400, description = "Below minimum or insufficient funds")
    )
)]
pub async fn request_withdrawal(
    withdrawal_service: web::Data<WithdrawalService>,
    req: HttpRequest,
    body: web::Json<CreateWithdrawalRequest>,
) -> Result<HttpResponse> {
    let user = match require_role(&req, ORGANIZER) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match withdrawal_service
        .request_withdrawal(user.id, body.into_inner())
        .await
    {
        Ok(withdrawal) => Ok(HttpResponse::Ok().json(ApiResponse::success(withdrawal))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/organizer/withdrawals",
    tag = "organizer",
    params(PaginationParams),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Caller's withdrawal requests, newest first")
    )
)]
pub async fn list_withdrawals(
    withdrawal_service: web::Data<WithdrawalService>,
    req: HttpRequest,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse> {
    let user = match require_role(&req, ORGANIZER) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match withdrawal_service.list_for_organizer(user.id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/organizer/events/{id}/stats",
    tag = "organizer",
    params(
        ("id" = i64, Path, description = "Event id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Sales figures", body = EventStatsResponse),
        (status = 403, description = "Event belongs to another organizer"),
        (status = 404, description = "No such event")
    )
)]
pub async fn event_stats(
    ticket_service: web::Data<TicketService>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let user = match require_role(&req, ORGANIZER) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match ticket_service.event_stats(user.id, path.into_inner()).await {
        Ok(stats) => Ok(HttpResponse::Ok().json(ApiResponse::success(stats))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn organizer_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/organizer")
            .route("/balance", web::get().to(get_balance))
            .route("/withdrawals", web::get().to(list_withdrawals))
            .route("/withdrawals", web::post().to(request_withdrawal))
            .route("/events/{id}/stats", web::get().to(event_stats)),
    );
}
