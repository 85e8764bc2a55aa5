use crate::entities::UserRole;
use crate::middlewares::require_role;
use crate::models::*;
use crate::services::{SettingsService, TicketService, WithdrawalService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

const ADMIN: &[UserRole] = &[UserRole::Admin];

#[utoipa::path(
    get,
    path = "/admin/withdrawals",
    tag = "admin",
    params(WithdrawalListQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Withdrawal requests, oldest first"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_withdrawals(
    withdrawal_service: web::Data<WithdrawalService>,
    req: HttpRequest,
    query: web::Query<WithdrawalListQuery>,
) -> Result<HttpResponse> {
    if let Err(e) = require_role(&req, ADMIN) {
        return Ok(e.error_response());
    }

    match withdrawal_service.list_all(query.into_inner()).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/withdrawals/{id}/review",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "Withdrawal request id")
    ),
    request_body = ReviewWithdrawalRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Request approved or rejected", body = WithdrawalResponse),
        (status = 409, description = "Request is no longer pending")
    )
)]
pub async fn review_withdrawal(
    withdrawal_service: web::Data<WithdrawalService>,
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<ReviewWithdrawalRequest>,
) -> Result<HttpResponse> {
    let admin = match require_role(&req, ADMIN) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match withdrawal_service
        .review(path.into_inner(), admin.id, body.into_inner())
        .await
    {
        Ok(withdrawal) => Ok(HttpResponse::Ok().json(ApiResponse::success(withdrawal))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/withdrawals/{id}/process",
    tag = "admin",
    params(
        ("id" = i64, Path, description = "Withdrawal request id")
    ),
    request_body = ProcessWithdrawalRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Payout recorded", body = WithdrawalResponse),
        (status = 409, description = "Request is not approved")
    )
)]
pub async fn process_withdrawal(
    withdrawal_service: web::Data<WithdrawalService>,
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<ProcessWithdrawalRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = require_role(&req, ADMIN) {
        return Ok(e.error_response());
    }

    match withdrawal_service
        .process(path.into_inner(), body.into_inner())
        .await
    {
        Ok(withdrawal) => Ok(HttpResponse::Ok().json(ApiResponse::success(withdrawal))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/admin/settings",
    tag = "admin",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Platform settings", body = SettingsResponse)
    )
)]
pub async fn get_settings(
    settings_service: web::Data<SettingsService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    if let Err(e) = require_role(&req, ADMIN) {
        return Ok(e.error_response());
    }

    match settings_service.get_settings().await {
        Ok(settings) => Ok(HttpResponse::Ok().json(ApiResponse::success(settings))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    put,
    path = "/admin/settings",
    tag = "admin",
    request_body = UpdateSettingsRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Settings updated", body = SettingsResponse),
        (status = 400, description = "Out of range value")
    )
)]
pub async fn update_settings(
    settings_service: web::Data<SettingsService>,
    req: HttpRequest,
    body: web::Json<UpdateSettingsRequest>,
) -> Result<HttpResponse> {
    let admin = match require_role(&req, ADMIN) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match settings_service
        .update_settings(admin.id, body.into_inner())
        .await
    {
        Ok(settings) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            settings,
            "Settings updated",
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "admin",
    params(PlatformStatsQuery),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Platform sales over the window", body = PlatformStatsResponse),
        (status = 400, description = "Bad date range")
    )
)]
pub async fn platform_stats(
    ticket_service: web::Data<TicketService>,
    req: HttpRequest,
    query: web::Query<PlatformStatsQuery>,
) -> Result<HttpResponse> {
    if let Err(e) = require_role(&req, ADMIN) {
        return Ok(e.error_response());
    }

    match ticket_service.platform_stats(query.into_inner()).await {
        Ok(stats) => Ok(HttpResponse::Ok().json(ApiResponse::success(stats))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/withdrawals", web::get().to(list_withdrawals))
            .route("/withdrawals/{id}/review", web::post().to(review_withdrawal))
            .route("/withdrawals/{id}/process", web::post().to(process_withdrawal))
            .route("/settings", web::get().to(get_settings))
            .route("/settings", web::put().to(update_settings))
            .route("/stats", web::get().to(platform_stats)),
    );
}
